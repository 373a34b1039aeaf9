use std::collections::BTreeMap;
use std::ops::Bound;

use fnv::{FnvHashMap, FnvHashSet};

/// Keeps track of the second at which each key expires.
///
/// Next to the expiry per key, all keys are bucketed by their expiry second. This permits to
/// efficiently collect all keys which are due within a given period without scanning all keys.
///
/// A key is always bucketed under exactly the second recorded for it, or it is not tracked at
/// all.
///
/// # Examples
/// ```
/// # use shardcache::cache::ExpireMap;
/// let mut expire_map = ExpireMap::new();
/// expire_map.touch("Foo", 10);
/// expire_map.touch("Bar", 12);
///
/// assert_eq!(expire_map.due(None, 11), vec!["Foo".to_owned()]);
///
/// // Touching a key again moves it into another bucket...
/// expire_map.touch("Foo", 15);
/// assert_eq!(expire_map.due(None, 11).is_empty(), true);
/// assert_eq!(expire_map.expire_at("Foo"), Some(15));
/// ```
#[derive(Default)]
pub struct ExpireMap {
    key_expire_at: FnvHashMap<String, u64>,
    buckets: BTreeMap<u64, FnvHashSet<String>>,
}

impl ExpireMap {
    /// Creates a new and empty map.
    pub fn new() -> Self {
        ExpireMap::default()
    }

    /// Records that the given key expires at the given second.
    ///
    /// If the key was already tracked, it is removed from its previous bucket.
    pub fn touch(&mut self, key: &str, expire_at: u64) {
        match self.key_expire_at.get_mut(key) {
            Some(current) if *current == expire_at => return,
            Some(current) => {
                let previous = *current;
                *current = expire_at;
                self.remove_from_bucket(previous, key);
            }
            None => {
                let _ = self.key_expire_at.insert(key.to_owned(), expire_at);
            }
        }

        let _ = self
            .buckets
            .entry(expire_at)
            .or_default()
            .insert(key.to_owned());
    }

    /// Stops tracking the given key.
    ///
    /// Returns **true** if the key was tracked, **false** otherwise.
    pub fn untrack(&mut self, key: &str) -> bool {
        match self.key_expire_at.remove(key) {
            Some(expire_at) => {
                self.remove_from_bucket(expire_at, key);
                true
            }
            None => false,
        }
    }

    fn remove_from_bucket(&mut self, expire_at: u64, key: &str) {
        if let Some(bucket) = self.buckets.get_mut(&expire_at) {
            let _ = bucket.remove(key);
            if bucket.is_empty() {
                let _ = self.buckets.remove(&expire_at);
            }
        }
    }

    /// Returns the second at which the given key expires.
    pub fn expire_at(&self, key: &str) -> Option<u64> {
        self.key_expire_at.get(key).copied()
    }

    /// Determines if the given key is tracked and has reached its expiry second.
    pub fn is_expired(&self, key: &str, now: u64) -> bool {
        matches!(self.expire_at(key), Some(expire_at) if expire_at <= now)
    }

    /// Returns all keys which expire after the second **after** (exclusive, or since the
    /// beginning of time if **None** is given) up to the second **until** (inclusive).
    ///
    /// Note that the keys remain tracked. They are only removed once they are actually deleted.
    pub fn due(&self, after: Option<u64>, until: u64) -> Vec<String> {
        let lower = match after {
            Some(after) if after >= until => return Vec::new(),
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };

        self.buckets
            .range((lower, Bound::Included(until)))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.key_expire_at.len()
    }

    /// Determines if no key is tracked at all.
    pub fn is_empty(&self) -> bool {
        self.key_expire_at.is_empty()
    }
}
