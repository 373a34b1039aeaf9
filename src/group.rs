//! Provides named caches which load missing values on demand.
//!
//! A [Group] is the main entry point of shardcache. It combines a local
//! [ConcurrentCache](crate::cache::ConcurrentCache) with a [Getter] which knows how to load a
//! value from its source of truth. If a key is missing, the group first asks the peer which owns
//! the key (see [PeerPicker](crate::peers::PeerPicker)). If there is no such peer (the key is
//! owned locally or no cluster is set up) or if the peer fails, the value is loaded via the
//! getter and stored in the local cache.
//!
//! Concurrent requests for the same missing key are coalesced into a single load using a
//! [SingleFlight](crate::singleflight::SingleFlight).
//!
//! # Examples
//! ```
//! # use shardcache::group::{Group, GetterFn};
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() {
//! let scores = Group::new(
//!     "scores",
//!     2048,
//!     Duration::from_secs(600),
//!     Arc::new(GetterFn::new(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     })),
//! );
//!
//! assert_eq!(scores.get("Tom").await.unwrap().as_str(), "630");
//! assert_eq!(scores.get("Unknown").await.unwrap_err().to_string(), "Unknown not exist");
//! # }
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::byteview::ByteView;
use crate::cache::{CacheStats, ConcurrentCache};
use crate::peers::PeerPicker;
use crate::singleflight::{SharedError, SingleFlight};

/// Loads the value of a key from its source of truth.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value of the given key.
    ///
    /// Errors are handed to the caller unchanged and are never cached.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain function or closure into a [Getter].
pub struct GetterFn<F> {
    function: F,
}

impl<F> GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    /// Wraps the given function.
    pub fn new(function: F) -> Self {
        GetterFn { function }
    }
}

#[async_trait]
impl<F> Getter for GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.function)(key)
    }
}

/// Provides a snapshot of the metrics of a [Group].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// The number of calls to [Group::get].
    pub gets: usize,
    /// The number of calls served from the local cache.
    pub hits: usize,
    /// The number of loads (after a cache miss).
    pub loads: usize,
    /// The number of values successfully fetched from a peer.
    pub peer_loads: usize,
    /// The number of failed attempts to fetch a value from a peer.
    pub peer_errors: usize,
    /// The number of values loaded via the getter.
    pub local_loads: usize,
    /// The metrics of the local cache.
    pub cache: CacheStats,
}

/// Represents a named cache along with the getter which populates it.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    cache: Arc<ConcurrentCache>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loader: SingleFlight<ByteView>,
    gets: AtomicUsize,
    hits: AtomicUsize,
    loads: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    local_loads: AtomicUsize,
}

impl Group {
    /// Creates a new group with the given cache capacity (in bytes) and time to live.
    ///
    /// Note that most probably a group should be created via
    /// [Groups::create](crate::registry::Groups::create) so that it can be found by its name.
    ///
    /// This starts the background expiry of the cache and therefore has to be invoked within a
    /// tokio runtime.
    pub fn new(name: &str, capacity: usize, ttl: Duration, getter: Arc<dyn Getter>) -> Arc<Self> {
        let cache = Arc::new(ConcurrentCache::new(capacity, ttl));
        cache.start_expiry();

        Arc::new(Group {
            name: name.to_owned(),
            getter,
            cache,
            peers: OnceLock::new(),
            loader: SingleFlight::new(),
            gets: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            peer_loads: AtomicUsize::new(0),
            peer_errors: AtomicUsize::new(0),
            local_loads: AtomicUsize::new(0),
        })
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides access to the local cache of this group.
    pub fn cache(&self) -> &Arc<ConcurrentCache> {
        &self.cache
    }

    /// Registers the picker used to find the peer which owns a key.
    ///
    /// # Panics
    /// Panics if a picker has already been registered, as this indicates a broken setup.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) {
        if self.peers.set(picker).is_err() {
            panic!(
                "Peers have already been registered for the group {}!",
                self.name
            );
        }
    }

    /// Returns the value of the given key.
    ///
    /// The value is served from the local cache if possible. Otherwise it is either fetched from
    /// the owning peer or loaded via the getter of this group.
    ///
    /// # Errors
    /// Fails if an empty key is given or if the value cannot be loaded. Callers which wait for
    /// the same load all receive the same error.
    pub async fn get(&self, key: &str) -> anyhow::Result<ByteView> {
        if key.is_empty() {
            return Err(anyhow::anyhow!("key is required"));
        }

        let _ = self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(value) = self.cache.get(key) {
            let _ = self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache hit for '{}' in group {}.", key, self.name);
            return Ok(value);
        }

        log::debug!("Cache miss for '{}' in group {}.", key, self.name);
        self.load(key).await
    }

    async fn load(&self, key: &str) -> anyhow::Result<ByteView> {
        self.loader
            .run(key, move || async move {
                let _ = self.loads.fetch_add(1, Ordering::Relaxed);

                if let Some(peer) = self.peers.get().and_then(|picker| picker.pick_peer(key)) {
                    match peer.get(&self.name, key).await {
                        Ok(data) => {
                            let _ = self.peer_loads.fetch_add(1, Ordering::Relaxed);
                            return Ok(ByteView::from(data));
                        }
                        Err(error) => {
                            let _ = self.peer_errors.fetch_add(1, Ordering::Relaxed);
                            log::warn!(
                                "Failed to fetch '{}' of group {} from its peer: {:#}",
                                key,
                                self.name,
                                error
                            );
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
            .map_err(|error| anyhow::Error::new(SharedError::from(error)))
    }

    async fn get_locally(&self, key: &str) -> anyhow::Result<ByteView> {
        let _ = self.local_loads.fetch_add(1, Ordering::Relaxed);
        log::debug!("Loading '{}' of group {} locally...", key, self.name);

        let data = self.getter.get(key).await?;
        let value = ByteView::copy_from(&data);
        if let Err(error) = self.cache.add(key, value.clone()) {
            log::warn!("Cannot cache '{}' in group {}: {:#}", key, self.name, error);
        }

        Ok(value)
    }

    /// Returns a snapshot of the metrics of this group.
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            peer_loads: self.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
            local_loads: self.local_loads.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }
}
