//! Provides the local, size constrained cache of a node.
//!
//! A plain LRU cache is easily thrashed by a burst of keys which are requested exactly once (e.g.
//! a crawler walking through all records): each of these keys pushes a valuable entry out of the
//! cache. Therefore the [HotColdCache] splits its memory into two tiers. New keys always land in
//! the (smaller) cold tier. Only if a key is accessed again within a short period of time
//! (see [PROMOTION_WINDOW]) it is promoted into the heat tier, where it is safe from one-time keys.
//! Keys which are no longer used are demoted back into the cold tier and finally evicted.
//!
//! Each cache can store all kinds of values for which the [ByteSize] trait is implemented, as
//! its limits are given in bytes rather than in number of entries.
//!
//! The [ConcurrentCache] wraps a [HotColdCache] of [ByteViews](crate::byteview::ByteView) so that
//! it can be shared by many tasks and applies a sliding TTL (time to live) to all entries. The
//! expiration times are kept by an [ExpireMap] which buckets keys by the second in which they
//! expire.
pub mod concurrent;
mod expiry;
mod hot_cold;

pub use concurrent::CacheStats;
pub use concurrent::ConcurrentCache;
pub use expiry::ExpireMap;
pub use hot_cold::ByteSize;
pub use hot_cold::EvictionListener;
pub use hot_cold::HotColdCache;
pub use hot_cold::ENTRY_OVERHEAD;
pub use hot_cold::PROMOTION_WINDOW;
