use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a string, this would
    /// be the bytes allocated on the heap).
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Contains the bookkeeping overhead (in bytes) which is accounted for each entry on top of the
/// lengths of its key and value.
pub const ENTRY_OVERHEAD: usize = 8;

/// Contains the promotion window in seconds.
///
/// An entry in the cold tier which is accessed again within this period is moved into the
/// heat tier.
pub const PROMOTION_WINDOW: u64 = 1;

/// Represents the callback which is invoked once an entry is definitively removed from a
/// [HotColdCache].
///
/// Note that this is never invoked when an entry is demoted from the heat into the cold tier.
pub type EvictionListener<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a size constrained cache which is split into a heat and a cold tier.
///
/// New entries are always placed in the cold tier. If an entry in the cold tier is accessed again
/// within the [PROMOTION_WINDOW], it is promoted into the heat tier. Once the heat tier overflows,
/// its least recently used entries are demoted back into the cold tier (where they have to
/// requalify for a promotion). Only entries which fall out of the cold tier are actually evicted.
///
/// Therefore a burst of keys which are only used once will only ever rotate through the cold tier
/// and cannot push the frequently used keys out of the cache.
///
/// The heat tier has the given capacity, the cold tier is half its size. Both are measured in
/// bytes: each entry accounts for the length of its key, the size of its value and a fixed
/// [ENTRY_OVERHEAD].
///
/// Note that the cache has no notion of time by itself. All operations accept the current
/// timestamp (in seconds) which is used to decide upon promotions.
///
/// # Examples
/// ```
/// # use shardcache::cache::HotColdCache;
/// // A heat tier of 64 bytes implies a cold tier of 32 bytes...
/// let mut cache = HotColdCache::new(64);
///
/// // New entries are placed in the cold tier...
/// cache.add("Foo".to_owned(), "Bar".to_owned(), 0).unwrap();
/// assert_eq!(cache.cold_length(), 3 + 3 + 8);
///
/// // ...and promoted, once they are re-used quickly...
/// assert_eq!(cache.get("Foo", 0).unwrap(), "Bar");
/// assert_eq!(cache.cold_length(), 0);
/// assert_eq!(cache.heat_length(), 3 + 3 + 8);
///
/// // An entry which doesn't even fit into the cold tier is rejected...
/// assert_eq!(cache.add("Large".to_owned(), "X".repeat(64), 0).is_err(), true);
/// assert_eq!(cache.get("Large", 0).is_none(), true);
/// ```
pub struct HotColdCache<V: ByteSize> {
    heat_capacity: usize,
    heat_length: usize,
    cold_capacity: usize,
    cold_length: usize,
    heat: LinkedHashMap<String, Entry<V>>,
    cold: LinkedHashMap<String, Entry<V>>,
    on_evict: Option<EvictionListener<V>>,
    promotions: usize,
    demotions: usize,
    evictions: usize,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    timestamp: u64,
    value: V,
}

fn within_promotion_window(timestamp: u64, now: u64) -> bool {
    now.saturating_sub(timestamp) < PROMOTION_WINDOW
}

impl<V: ByteSize + Clone> HotColdCache<V> {
    /// Creates a new cache with the given capacity (in bytes) for its heat tier.
    pub fn new(capacity: usize) -> Self {
        HotColdCache {
            heat_capacity: capacity,
            heat_length: 0,
            cold_capacity: capacity / 2,
            cold_length: 0,
            heat: LinkedHashMap::new(),
            cold: LinkedHashMap::new(),
            on_evict: None,
            promotions: 0,
            demotions: 0,
            evictions: 0,
        }
    }

    /// Creates a new cache which notifies the given listener for each evicted or deleted entry.
    ///
    /// # Examples
    /// ```
    /// # use shardcache::cache::HotColdCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut cache = HotColdCache::with_listener(
    ///     64,
    ///     Box::new(move |key: &str, _: &String| log.lock().unwrap().push(key.to_owned())),
    /// );
    ///
    /// cache.add("Foo".to_owned(), "Bar".to_owned(), 0).unwrap();
    /// cache.delete("Foo");
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["Foo".to_owned()]);
    /// ```
    pub fn with_listener(capacity: usize, listener: EvictionListener<V>) -> Self {
        let mut cache = HotColdCache::new(capacity);
        cache.on_evict = Some(listener);
        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already in the heat tier, its value is replaced and it becomes the most
    /// recently used entry. If it resides in the cold tier, the entry is promoted if it has been
    /// touched within the [PROMOTION_WINDOW] and left untouched otherwise. In both cases the
    /// stored value is kept. Unknown keys are placed in the cold tier.
    ///
    /// # Errors
    /// Fails if the given entry is larger than the cold tier, as it would be evicted right away.
    pub fn add(&mut self, key: String, value: V, now: u64) -> anyhow::Result<()> {
        let mem_size = key.len() + value.allocated_size() + ENTRY_OVERHEAD;
        if mem_size > self.cold_capacity {
            return Err(anyhow::anyhow!(
                "The entry for '{}' ({} bytes) is larger than the cold tier of the cache ({} bytes)!",
                key,
                mem_size,
                self.cold_capacity
            ));
        }

        if let Some(entry) = self.heat.get_refresh(&key) {
            self.heat_length = self.heat_length - entry.mem_size + mem_size;
            entry.mem_size = mem_size;
            entry.timestamp = now;
            entry.value = value;
        } else if let Some(entry) = self.cold.get(&key) {
            if within_promotion_window(entry.timestamp, now) {
                self.promote(&key, now);
            }
        } else {
            self.cold_length += mem_size;
            let _ = self.cold.insert(
                key,
                Entry {
                    mem_size,
                    timestamp: now,
                    value,
                },
            );
        }

        self.enforce_constraints(now);

        Ok(())
    }

    /// Returns the value stored for the given key or **None** if no value is present.
    ///
    /// An entry of the heat tier becomes the most recently used one. An entry of the cold tier is
    /// promoted if it has been touched within the [PROMOTION_WINDOW], otherwise its position
    /// remains unchanged.
    pub fn get(&mut self, key: &str, now: u64) -> Option<V> {
        if let Some(entry) = self.heat.get_refresh(key) {
            entry.timestamp = now;
            return Some(entry.value.clone());
        }

        let (value, promote) = match self.cold.get(key) {
            Some(entry) => (
                entry.value.clone(),
                within_promotion_window(entry.timestamp, now),
            ),
            None => return None,
        };

        if promote {
            log::debug!("Promoting '{}' into the heat tier...", key);
            self.promote(key, now);
            self.enforce_constraints(now);
        }

        Some(value)
    }

    /// Removes the entry for the given key from whichever tier holds it.
    ///
    /// Returns **true** if an entry was removed. The eviction listener is notified for each
    /// removed entry. Deleting an unknown key is a no-op.
    pub fn delete(&mut self, key: &str) -> bool {
        let entry = if let Some(entry) = self.heat.remove(key) {
            self.heat_length -= entry.mem_size;
            entry
        } else if let Some(entry) = self.cold.remove(key) {
            self.cold_length -= entry.mem_size;
            entry
        } else {
            return false;
        };

        self.notify(key, &entry.value);
        true
    }

    /// Determines if an entry is present for the given key (without touching it).
    pub fn contains(&self, key: &str) -> bool {
        self.heat.contains_key(key) || self.cold.contains_key(key)
    }

    fn promote(&mut self, key: &str, now: u64) {
        if let Some(mut entry) = self.cold.remove(key) {
            self.cold_length -= entry.mem_size;
            self.heat_length += entry.mem_size;
            entry.timestamp = now;
            self.promotions += 1;
            let _ = self.heat.insert(key.to_owned(), entry);
        }
    }

    fn enforce_constraints(&mut self, now: u64) {
        while self.heat_length > self.heat_capacity {
            match self.heat.pop_front() {
                Some((key, mut entry)) => {
                    self.heat_length -= entry.mem_size;
                    self.cold_length += entry.mem_size;
                    // The entry has to requalify for the heat tier...
                    entry.timestamp = now;
                    self.demotions += 1;
                    let _ = self.cold.insert(key, entry);
                }
                None => unreachable!("Failed to enforce the heat capacity of a hot/cold cache!"),
            }
        }

        while self.cold_length > self.cold_capacity {
            match self.cold.pop_front() {
                Some((key, entry)) => {
                    self.cold_length -= entry.mem_size;
                    self.evictions += 1;
                    log::debug!("Evicting '{}' from the cold tier...", key);
                    self.notify(&key, &entry.value);
                }
                None => unreachable!("Failed to enforce the cold capacity of a hot/cold cache!"),
            }
        }
    }

    fn notify(&mut self, key: &str, value: &V) {
        if let Some(listener) = self.on_evict.as_mut() {
            listener(key, value);
        }
    }

    /// Returns the number of entries in both tiers.
    pub fn len(&self) -> usize {
        self.heat.len() + self.cold.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.heat.is_empty() && self.cold.is_empty()
    }

    /// Returns the number of bytes occupied in the heat tier.
    pub fn heat_length(&self) -> usize {
        self.heat_length
    }

    /// Returns the capacity of the heat tier in bytes.
    pub fn heat_capacity(&self) -> usize {
        self.heat_capacity
    }

    /// Returns the number of bytes occupied in the cold tier.
    pub fn cold_length(&self) -> usize {
        self.cold_length
    }

    /// Returns the capacity of the cold tier in bytes.
    pub fn cold_capacity(&self) -> usize {
        self.cold_capacity
    }

    /// Returns the number of promotions from the cold into the heat tier.
    pub fn promotions(&self) -> usize {
        self.promotions
    }

    /// Returns the number of demotions from the heat into the cold tier.
    pub fn demotions(&self) -> usize {
        self.demotions
    }

    /// Returns the number of entries which were evicted as the cold tier overflowed.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::HotColdCache;
    use std::sync::{Arc, Mutex};

    fn recording_cache(capacity: usize) -> (HotColdCache<String>, Arc<Mutex<Vec<String>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();
        let cache = HotColdCache::with_listener(
            capacity,
            Box::new(move |key: &str, _: &String| log.lock().unwrap().push(key.to_owned())),
        );

        (cache, evicted)
    }

    #[test]
    fn quick_reads_promote_into_the_heat_tier() {
        let mut cache = HotColdCache::new(100);
        cache.add("key1".to_owned(), "1234".to_owned(), 0).unwrap();

        assert_eq!(cache.get("key1", 0).unwrap(), "1234");
        assert_eq!(cache.cold_length(), 0);
        assert_eq!(cache.heat_length(), 4 + 4 + 8);
        assert_eq!(cache.promotions(), 1);
        assert_eq!(cache.get("key2", 0), None);
    }

    #[test]
    fn slow_reads_stay_in_the_cold_tier() {
        let mut cache = HotColdCache::new(100);
        cache.add("key1".to_owned(), "1234".to_owned(), 0).unwrap();

        assert_eq!(cache.get("key1", 2005).unwrap(), "1234");
        assert_eq!(cache.heat_length(), 0);
        assert_eq!(cache.cold_length(), 4 + 4 + 8);
    }

    #[test]
    fn least_recently_used_entries_are_evicted() {
        // Room for two entries in the heat tier and one in the cold tier...
        let mut cache = HotColdCache::new(36);

        cache.add("key1".to_owned(), "value1".to_owned(), 0).unwrap();
        assert_eq!(cache.get("key1", 0).is_some(), true);
        assert_eq!(cache.len(), 1);

        cache.add("key2".to_owned(), "value2".to_owned(), 1).unwrap();
        assert_eq!(cache.get("key2", 1).is_some(), true);
        assert_eq!(cache.len(), 2);

        // Promoting key3 pushes key1 back into the cold tier...
        cache.add("key3".to_owned(), "value3".to_owned(), 2).unwrap();
        assert_eq!(cache.get("key3", 2).is_some(), true);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.demotions(), 1);

        // ...where it is evicted by the next new entry.
        cache.add("key4".to_owned(), "value4".to_owned(), 3).unwrap();
        assert_eq!(cache.get("key4", 3).is_some(), true);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("key1", 3), None);
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn only_cold_evictions_notify_the_listener() {
        let (mut cache, evicted) = recording_cache(24);

        cache.add("k1".to_owned(), "k1".to_owned(), 0).unwrap();
        let _ = cache.get("k1", 0);
        cache.add("k2".to_owned(), "k2".to_owned(), 0).unwrap();
        let _ = cache.get("k2", 0);
        cache.add("k3".to_owned(), "k3".to_owned(), 0).unwrap();
        cache.add("k4".to_owned(), "k4".to_owned(), 0).unwrap();

        assert_eq!(evicted.lock().unwrap().as_slice(), &["k3".to_owned()]);
    }

    #[test]
    fn a_full_cold_tier_evicts_exactly_its_oldest_entry() {
        // Each entry occupies 2 + 2 + 8 = 12 bytes, so the cold tier (36 bytes) fits three...
        let (mut cache, evicted) = recording_cache(72);

        cache.add("k1".to_owned(), "v1".to_owned(), 0).unwrap();
        cache.add("k2".to_owned(), "v2".to_owned(), 10).unwrap();
        cache.add("k3".to_owned(), "v3".to_owned(), 20).unwrap();
        assert_eq!(evicted.lock().unwrap().is_empty(), true);

        cache.add("k4".to_owned(), "v4".to_owned(), 30).unwrap();
        assert_eq!(evicted.lock().unwrap().as_slice(), &["k1".to_owned()]);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.contains("k1"), false);
    }

    #[test]
    fn demotions_are_not_reported_as_evictions() {
        let (mut cache, evicted) = recording_cache(24);

        for key in ["k1", "k2", "k3"] {
            cache.add(key.to_owned(), key.to_owned(), 0).unwrap();
            let _ = cache.get(key, 0);
        }

        // k1 has been demoted but is still present...
        assert_eq!(cache.demotions(), 1);
        assert_eq!(cache.contains("k1"), true);
        assert_eq!(evicted.lock().unwrap().is_empty(), true);

        // ...and its deletion is reported.
        assert_eq!(cache.delete("k1"), true);
        assert_eq!(evicted.lock().unwrap().as_slice(), &["k1".to_owned()]);
    }

    #[test]
    fn deleting_unknown_keys_is_a_no_op() {
        let (mut cache, evicted) = recording_cache(100);
        cache.add("Foo".to_owned(), "Bar".to_owned(), 0).unwrap();

        assert_eq!(cache.delete("Unknown"), false);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cold_length(), 14);
        assert_eq!(evicted.lock().unwrap().is_empty(), true);
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let mut cache = HotColdCache::new(1024);

        assert_eq!(
            cache
                .add("Foo".to_owned(), "X".repeat(2000), 0)
                .is_err(),
            true
        );
        assert_eq!(cache.get("Foo", 0), None);
        assert_eq!(cache.is_empty(), true);
    }

    #[test]
    fn updates_are_accounted_correctly() {
        let mut cache = HotColdCache::new(100);

        cache.add("Foo".to_owned(), "Bar".to_owned(), 0).unwrap();
        let _ = cache.get("Foo", 0);
        cache.add("Foo".to_owned(), "Barbara".to_owned(), 1).unwrap();

        assert_eq!(cache.get("Foo", 1).unwrap(), "Barbara");
        assert_eq!(cache.heat_length(), 3 + 7 + 8);
        assert_eq!(cache.cold_length(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn adding_a_cold_key_outside_the_window_changes_nothing() {
        let (mut cache, evicted) = recording_cache(72);
        cache.add("k1".to_owned(), "v1".to_owned(), 0).unwrap();
        cache.add("k2".to_owned(), "v2".to_owned(), 10).unwrap();

        cache
            .add("k1".to_owned(), "a much longer value".to_owned(), 20)
            .unwrap();

        assert_eq!(cache.get("k1", 20).unwrap(), "v1");
        assert_eq!(cache.cold_length(), 2 * (2 + 2 + 8));
        assert_eq!(cache.heat_length(), 0);
        assert_eq!(cache.promotions(), 0);

        // k1 is still the least recently used entry of the cold tier...
        cache.add("k3".to_owned(), "v3".to_owned(), 30).unwrap();
        cache.add("k4".to_owned(), "v4".to_owned(), 40).unwrap();
        assert_eq!(evicted.lock().unwrap().as_slice(), &["k1".to_owned()]);
    }

    #[test]
    fn adding_a_cold_key_within_the_window_promotes_it() {
        let mut cache = HotColdCache::new(100);
        cache.add("Foo".to_owned(), "Bar".to_owned(), 5).unwrap();
        cache.add("Foo".to_owned(), "Barbara".to_owned(), 5).unwrap();

        assert_eq!(cache.promotions(), 1);
        assert_eq!(cache.cold_length(), 0);
        assert_eq!(cache.heat_length(), 3 + 3 + 8);
        assert_eq!(cache.get("Foo", 6).unwrap(), "Bar");
    }

    #[test]
    fn tier_capacities_hold_after_every_call() {
        let mut cache = HotColdCache::new(200);

        for i in 0..2000_usize {
            let key = format!("key{}", (i * 7) % 23);
            let now = (i / 5) as u64;
            if i % 3 == 0 {
                let _ = cache.get(&key, now);
            } else {
                cache.add(key, "X".repeat(i % 13), now).unwrap();
            }

            assert_eq!(cache.heat_length() <= cache.heat_capacity(), true);
            assert_eq!(cache.cold_length() <= cache.cold_capacity(), true);

            let heat: usize = cache.heat.iter().map(|(_, entry)| entry.mem_size).sum();
            let cold: usize = cache.cold.iter().map(|(_, entry)| entry.mem_size).sum();
            assert_eq!(heat, cache.heat_length());
            assert_eq!(cold, cache.cold_length());
        }
    }
}
