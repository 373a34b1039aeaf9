//! shardcache is the data plane of a distributed, in-memory key-value cache.
//!
//! # Introduction
//! A cluster of **shardcache** nodes shares a key space: each node owns a disjoint shard (as
//! determined by a [consistent hash ring](consistenthash::HashRing)) and keeps the values of its
//! shard in a local, size constrained cache. If a key is requested which isn't cached yet, the
//! node either asks the peer owning the key or, if the key is owned locally (or the peer is
//! unreachable), invokes a user supplied [Getter](group::Getter) which loads the value from the
//! actual source of truth (a database, a remote service...).
//!
//! The hard part is hidden in the details:
//! * **Hot/Cold Cache**: the local cache is split into two tiers. New and rarely used keys land
//!   in the cold tier. Keys which are re-accessed quickly are promoted into the heat tier. This
//!   makes the cache resistant against bursts of one-time keys which would thrash a plain LRU.
//!   See [cache::HotColdCache].
//! * **Sliding expiration**: every access extends the lifetime of a key. Expired keys are
//!   collected once per second and removed in batches by a background worker. See
//!   [cache::ConcurrentCache].
//! * **Request coalescing**: if many callers miss the same key at the same time, only a single
//!   load is performed and all callers receive its result. See [singleflight].
//!
//! # Modules
//! * [group]: a named cache which ties all components together. This is the main entry point.
//! * [registry]: keeps all groups of a node so that a transport layer can find them by name.
//! * [peers]: abstractions of remote peers along with a picker based on the hash ring.
//! * [config]: the reload-aware system configuration (**config/settings.yml**).
//!
//! Note that shardcache doesn't ship a wire protocol. A transport layer has to provide a
//! [PeerConnector](peers::PeerConnector) to reach other nodes and to expose
//! [Group::get](group::Group::get) to its clients.
//!
//! # Example
//! ```no_run
//! # use shardcache::builder::Builder;
//! # use shardcache::group::GetterFn;
//! # use shardcache::registry::Groups;
//! # use std::sync::Arc;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     let groups = platform.require::<Groups>();
//!     let scores = groups
//!         .define(
//!             "scores",
//!             Arc::new(GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec()))),
//!         )
//!         .unwrap();
//!
//!     assert_eq!(scores.get("Tom").await.unwrap().as_str(), "Tom");
//! }
//! ```
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod cache;
pub mod config;
pub mod consistenthash;
pub mod fmt;
pub mod group;
pub mod peers;
pub mod platform;
pub mod registry;
pub mod singleflight;

/// Contains the version of the shardcache library.
pub const SHARDCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the shardcache build being used.
pub const SHARDCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests create several platforms, but the logger may only be installed once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle as none of our
/// background tasks is ever awaited.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate shardcache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    /// Executes async code within a single threaded tokio runtime.
    ///
    /// Being single threaded also keeps all tasks on the thread which owns the mocked clock
    /// (see **mock_instant**).
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }
}
