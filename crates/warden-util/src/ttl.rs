//! Expiring key/value map

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Bounded map whose entries expire a fixed time after insertion.
///
/// Expired entries are treated as absent and dropped lazily on access.
/// When the map is full, the oldest entry is evicted to make room.
#[derive(Debug)]
pub struct TtlMap<K, V> {
    /// Maximum number of live entries
    max_len: usize,
    /// Lifetime of each entry
    max_age: Duration,
    entries: HashMap<K, TtlEntry<V>>,
}

#[derive(Debug)]
struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<K: Eq + Hash + Clone, V> TtlMap<K, V> {
    /// Create a new map
    ///
    /// # Arguments
    /// * `max_len` - Maximum entries kept at once
    /// * `max_age` - How long an entry stays valid after insertion
    pub fn new(max_len: usize, max_age: Duration) -> Self {
        Self {
            max_len: max_len.max(1),
            max_age,
            entries: HashMap::new(),
        }
    }

    /// Get a live value, dropping it if it has expired
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| now.duration_since(e.inserted_at) >= self.max_age);

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|e| &e.value)
    }

    /// Whether a live value exists for the key
    pub fn contains(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value, resetting its lifetime
    pub fn insert(&mut self, key: K, value: V) {
        let now = Instant::now();
        self.purge_expired(now);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_len {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            key,
            TtlEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Remove a value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Number of entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.entries
            .retain(|_, e| now.duration_since(e.inserted_at) < max_age);
    }
}
