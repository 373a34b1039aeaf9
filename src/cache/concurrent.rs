//! Provides the thread safe cache with sliding TTLs (see [ConcurrentCache]).

#[cfg(test)]
use mock_instant::Instant;
#[cfg(not(test))]
use std::time::Instant;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::byteview::ByteView;
use crate::cache::{EvictionListener, ExpireMap, HotColdCache};

/// Contains the capacity of the queue which hands batches of expired keys from the timer over to
/// the deletion worker.
///
/// If the worker falls behind, the timer blocks until there is room again.
pub const DELETE_QUEUE_CAPACITY: usize = 100;

/// Determines how often the timer checks for expired keys.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

/// Represents a set of keys which were due at (or before) a given second.
struct ExpiredBatch {
    until: u64,
    keys: Vec<String>,
}

/// Provides a snapshot of the metrics of a [ConcurrentCache].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// The number of entries in both tiers.
    pub entries: usize,
    /// The number of keys being tracked for expiration.
    pub tracked_keys: usize,
    /// The number of bytes occupied in the heat tier.
    pub heat_length: usize,
    /// The capacity of the heat tier in bytes.
    pub heat_capacity: usize,
    /// The number of bytes occupied in the cold tier.
    pub cold_length: usize,
    /// The capacity of the cold tier in bytes.
    pub cold_capacity: usize,
    /// The number of promotions into the heat tier.
    pub promotions: usize,
    /// The number of demotions into the cold tier.
    pub demotions: usize,
    /// The number of entries evicted as the cold tier overflowed.
    pub evictions: usize,
}

struct Inner {
    lru: HotColdCache<ByteView>,
    expiry: ExpireMap,
}

/// Makes a [HotColdCache] safe to share and applies a sliding TTL to all of its entries.
///
/// Each **add** or successful **get** extends the lifetime of a key to **now + ttl**. Keys
/// which have reached their expiry second are reported as misses right away and are removed
/// by a background worker (see [start_expiry](ConcurrentCache::start_expiry)) within about a
/// second.
///
/// Timestamps are whole seconds, therefore the TTL is rounded up to full seconds and an entry
/// is kept until the end of the second in which it would time out. Each entry lives at least
/// for the given TTL, even if it is shorter than a second.
///
/// All operations are serialized by a single lock which covers both, the cache itself and the
/// expiration bookkeeping.
///
/// # Examples
/// ```
/// # use shardcache::cache::ConcurrentCache;
/// # use shardcache::byteview::ByteView;
/// # use std::time::Duration;
/// let cache = ConcurrentCache::new(1024, Duration::from_secs(60));
///
/// cache.add("Foo", ByteView::from("Bar")).unwrap();
/// assert_eq!(cache.get("Foo").unwrap().as_str(), "Bar");
///
/// cache.delete("Foo");
/// assert_eq!(cache.get("Foo"), None);
/// ```
pub struct ConcurrentCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
    ttl_seconds: u64,
    epoch: Instant,
}

impl ConcurrentCache {
    /// Creates a new cache with the given capacity (in bytes) and time to live.
    ///
    /// The capacity is the size of the heat tier, the cold tier is half its size. Note that
    /// the TTL is applied with a granularity of seconds.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        ConcurrentCache::create(HotColdCache::new(capacity), capacity, ttl)
    }

    /// Creates a new cache which notifies the given listener once an entry is evicted, expired
    /// or deleted.
    pub fn with_listener(
        capacity: usize,
        ttl: Duration,
        listener: EvictionListener<ByteView>,
    ) -> Self {
        ConcurrentCache::create(HotColdCache::with_listener(capacity, listener), capacity, ttl)
    }

    fn create(lru: HotColdCache<ByteView>, capacity: usize, ttl: Duration) -> Self {
        ConcurrentCache {
            inner: Mutex::new(Inner {
                lru,
                expiry: ExpireMap::new(),
            }),
            capacity,
            ttl,
            ttl_seconds: whole_seconds(ttl),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The bookkeeping is updated in a way that it is never left inconsistent by a panicking
        // eviction listener, therefore we can safely continue on a poisoned lock...
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current timestamp in seconds since this cache was created.
    pub fn now(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_secs()
    }

    /// Returns the first second in which an entry accessed at **now** counts as expired.
    fn expiry_for(&self, now: u64) -> u64 {
        now.saturating_add(self.ttl_seconds).saturating_add(1)
    }

    /// Stores the given value and (re-)starts its time to live.
    ///
    /// # Errors
    /// Fails if the entry is too large to be cached at all. In this case, no expiry is tracked
    /// for the key either.
    pub fn add(&self, key: &str, value: ByteView) -> anyhow::Result<()> {
        let now = self.now();
        let mut inner = self.lock();
        inner.lru.add(key.to_owned(), value, now)?;
        inner.expiry.touch(key, self.expiry_for(now));

        Ok(())
    }

    /// Returns the value for the given key and extends its time to live.
    ///
    /// Returns **None** if the key is unknown or has already expired.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let now = self.now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.expiry.is_expired(key, now) {
            log::debug!("'{}' has expired and will be removed.", key);
            let _ = inner.lru.delete(key);
            let _ = inner.expiry.untrack(key);
            return None;
        }

        match inner.lru.get(key, now) {
            Some(value) => {
                inner.expiry.touch(key, self.expiry_for(now));
                Some(value)
            }
            None => {
                // The key might have been evicted due to the capacity constraints...
                let _ = inner.expiry.untrack(key);
                None
            }
        }
    }

    /// Removes the given key. Removing an unknown key is a no-op.
    pub fn delete(&self, key: &str) {
        let mut inner = self.lock();
        let _ = inner.lru.delete(key);
        let _ = inner.expiry.untrack(key);
    }

    /// Removes all given keys while holding the lock only once.
    pub fn delete_batch(&self, keys: &[String]) {
        let mut inner = self.lock();
        for key in keys {
            let _ = inner.lru.delete(key);
            let _ = inner.expiry.untrack(key);
        }
    }

    /// Returns the keys which are due after the second **after** up to the second **until**.
    fn due(&self, after: Option<u64>, until: u64) -> Vec<String> {
        self.lock().expiry.due(after, until)
    }

    /// Removes the keys of the given batch which are still due.
    ///
    /// A key which has been accessed since the batch was collected has a later expiry and is
    /// therefore kept. Returns the number of removed keys.
    fn expire(&self, batch: &ExpiredBatch) -> usize {
        let mut inner = self.lock();
        let mut expired = 0;
        for key in &batch.keys {
            if inner.expiry.is_expired(key, batch.until) {
                let _ = inner.lru.delete(key);
                let _ = inner.expiry.untrack(key);
                expired += 1;
            }
        }

        expired
    }

    /// Starts the background tasks which remove expired keys.
    ///
    /// Once per second a timer collects all keys which have become due and hands them to a
    /// deletion worker via a bounded queue (see [DELETE_QUEUE_CAPACITY]). Batches are processed
    /// in the order in which they were collected.
    ///
    /// Both tasks only keep a weak reference on the cache and terminate once it is dropped.
    ///
    /// Note that this has to be invoked within a tokio runtime.
    pub fn start_expiry(self: &Arc<Self>) {
        let (queue, mut endpoint) = mpsc::channel::<ExpiredBatch>(DELETE_QUEUE_CAPACITY);

        let cache = Arc::downgrade(self);
        crate::spawn!(async move {
            let mut timer = tokio::time::interval(EXPIRY_INTERVAL);
            let mut checked_until = None;

            loop {
                let _ = timer.tick().await;

                let (now, keys) = match cache.upgrade() {
                    Some(cache) => {
                        let now = cache.now();
                        (now, cache.due(checked_until, now))
                    }
                    None => return,
                };
                checked_until = Some(now);

                if !keys.is_empty() {
                    log::debug!("{} key(s) became due at {}.", keys.len(), now);
                    if queue.send(ExpiredBatch { until: now, keys }).await.is_err() {
                        return;
                    }
                }
            }
        });

        let cache = Arc::downgrade(self);
        crate::spawn!(async move {
            while let Some(batch) = endpoint.recv().await {
                match cache.upgrade() {
                    Some(cache) => {
                        let expired = cache.expire(&batch);
                        log::debug!(
                            "Removed {} of {} expired key(s).",
                            expired,
                            batch.keys.len()
                        );
                    }
                    None => return,
                }
            }
        });
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.lock().lru.is_empty()
    }

    /// Returns the number of keys being tracked for expiration.
    pub fn tracked_keys(&self) -> usize {
        self.lock().expiry.len()
    }

    /// Returns the capacity (of the heat tier) in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the time to live which is applied to each entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a snapshot of the metrics of this cache.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.lru.len(),
            tracked_keys: inner.expiry.len(),
            heat_length: inner.lru.heat_length(),
            heat_capacity: inner.lru.heat_capacity(),
            cold_length: inner.lru.cold_length(),
            cold_capacity: inner.lru.cold_capacity(),
            promotions: inner.lru.promotions(),
            demotions: inner.lru.demotions(),
            evictions: inner.lru.evictions(),
        }
    }
}

/// Rounds the given duration up to whole seconds.
fn whole_seconds(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs().saturating_add(1)
    } else {
        duration.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::cache::concurrent::ExpiredBatch;
    use crate::cache::ConcurrentCache;
    use mock_instant::MockClock;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn values_can_be_read_back() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(60 * 60));
        cache.add("Foo", ByteView::from("Bar")).unwrap();

        assert_eq!(cache.get("Foo").unwrap(), ByteView::from("Bar"));
        assert_eq!(cache.stats().tracked_keys, 1);
        assert_eq!(cache.get("Unknown"), None);
    }

    #[test]
    fn oversized_values_are_rejected() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(60 * 60));

        assert_eq!(
            cache.add("Foo", ByteView::from("X".repeat(2000))).is_err(),
            true
        );
        assert_eq!(cache.get("Foo"), None);
        assert_eq!(cache.stats().tracked_keys, 0);
        assert_eq!(cache.is_empty(), true);
    }

    #[test]
    fn every_access_extends_the_lifetime() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(2));
        cache.add("Foo", ByteView::from("Bar")).unwrap();

        MockClock::advance(Duration::from_secs(1));
        assert_eq!(cache.get("Foo").is_some(), true);
        MockClock::advance(Duration::from_secs(1));
        assert_eq!(cache.get("Foo").is_some(), true);
        MockClock::advance(Duration::from_secs(2));
        assert_eq!(cache.get("Foo").is_some(), true);

        // Once the third second after the last access starts, the entry is gone...
        MockClock::advance(Duration::from_secs(3));
        assert_eq!(cache.get("Foo"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().tracked_keys, 0);
    }

    #[test]
    fn refreshed_keys_survive_a_pending_batch() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(2));
        cache.add("A", ByteView::from("1")).unwrap();
        cache.add("B", ByteView::from("2")).unwrap();

        // Both keys are due at second 3...
        assert_eq!(cache.due(None, 2).is_empty(), true);
        let batch = ExpiredBatch {
            until: 3,
            keys: cache.due(None, 3),
        };
        assert_eq!(batch.keys.len(), 2);

        // ...but A is accessed before the batch is processed...
        MockClock::advance(Duration::from_secs(1));
        assert_eq!(cache.get("A").is_some(), true);

        assert_eq!(cache.expire(&batch), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("A").is_some(), true);
    }

    #[test]
    fn sub_second_ttls_still_permit_reads() {
        let cache = ConcurrentCache::new(1024, Duration::from_millis(500));
        cache.add("Foo", ByteView::from("Bar")).unwrap();
        assert_eq!(cache.get("Foo").is_some(), true);

        MockClock::advance(Duration::from_millis(999));
        assert_eq!(cache.get("Foo").is_some(), true);

        MockClock::advance(Duration::from_secs(2));
        assert_eq!(cache.get("Foo"), None);
    }

    #[test]
    fn entries_live_for_their_full_ttl() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(1));

        // Written at the very end of second 0...
        MockClock::advance(Duration::from_millis(999));
        cache.add("Foo", ByteView::from("Bar")).unwrap();

        // ...still present 1ms later...
        MockClock::advance(Duration::from_millis(1));
        assert_eq!(cache.get("Foo").is_some(), true);

        // ...and gone once its TTL has definitely passed since the last access.
        MockClock::advance(Duration::from_secs(2));
        assert_eq!(cache.get("Foo"), None);
    }

    #[test]
    fn huge_ttls_do_not_overflow() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(u64::MAX));
        MockClock::advance(Duration::from_secs(5));

        cache.add("Foo", ByteView::from("Bar")).unwrap();
        MockClock::advance(Duration::from_secs(60));
        assert_eq!(cache.get("Foo").is_some(), true);

        assert_eq!(ConcurrentCache::new(1024, Duration::MAX).ttl(), Duration::MAX);
    }

    #[test]
    fn deleting_is_idempotent() {
        let cache = ConcurrentCache::new(1024, Duration::from_secs(60 * 60));
        cache.add("A", ByteView::from("1")).unwrap();
        cache.add("B", ByteView::from("2")).unwrap();

        cache.delete("Unknown");
        assert_eq!(cache.len(), 2);

        cache.delete_batch(&["A".to_owned(), "Unknown".to_owned()]);
        cache.delete_batch(&["A".to_owned()]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().tracked_keys, 1);
        assert_eq!(cache.get("B").is_some(), true);
    }

    #[test]
    fn expired_keys_are_removed_in_the_background() {
        crate::testing::test_async(async {
            let evicted = Arc::new(Mutex::new(Vec::new()));
            let log = evicted.clone();
            let cache = Arc::new(ConcurrentCache::with_listener(
                1024,
                Duration::from_secs(1),
                Box::new(move |key: &str, _: &ByteView| log.lock().unwrap().push(key.to_owned())),
            ));
            cache.start_expiry();

            cache.add("Foo", ByteView::from("Bar")).unwrap();
            MockClock::advance(Duration::from_secs(2));

            // Give the timer and the deletion worker a chance to run...
            tokio::time::sleep(Duration::from_millis(1500)).await;

            assert_eq!(cache.len(), 0);
            assert_eq!(cache.stats().tracked_keys, 0);
            assert_eq!(evicted.lock().unwrap().as_slice(), &["Foo".to_owned()]);
        });
    }
}
