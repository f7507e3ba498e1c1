//! Sharded concurrent hash maps.
//!
//! The duplicate-marking engine, the CIGAR cache, and the interning pool all
//! need an at-most-once-insert (`putIfAbsent`) associative table that many
//! worker threads hit at once. [`ShardedMap`] spreads keys over a fixed array
//! of small `AHashMap`s, each behind its own `parking_lot::Mutex`. A shard
//! guard is held only for the duration of one map operation; callers that run
//! compare-and-swap retry loops do so against atomics stored as values, never
//! while holding a shard lock.

use std::hash::Hash;

use ahash::{AHashMap, RandomState};
use parking_lot::Mutex;

const SHARD_COUNT: usize = 64;

/// A concurrent map sharded over [`SHARD_COUNT`] mutex-guarded `AHashMap`s.
pub struct ShardedMap<K, V> {
    shards: Box<[Mutex<AHashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(AHashMap::new())).collect();
        Self { shards, hasher: RandomState::new() }
    }
}

impl<K: Eq + Hash, V: Clone> ShardedMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shard_for(&self, key: &K) -> &Mutex<AHashMap<K, V>> {
        let h = self.hasher.hash_one(key) as usize;
        &self.shards[h % SHARD_COUNT]
    }

    /// Returns a clone of the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.shard_for(key).lock().get(key).cloned()
    }

    /// `putIfAbsent`: returns the existing value for `key`, or inserts the
    /// value produced by `make` and returns that.
    ///
    /// `make` runs under the shard lock, so concurrent inserts of the same
    /// key construct the value exactly once; a racing caller observes the
    /// winner's value and its own candidate is never created.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        self.shard_for(&key).lock().entry(key).or_insert_with(make).clone()
    }

    /// Atomic rendezvous primitive: if `key` is vacant, buffers `value` and
    /// returns `None`; if occupied, removes and returns the buffered value.
    ///
    /// Exactly one of two concurrent callers with the same key completes the
    /// exchange; a third caller re-buffers as if it arrived first.
    pub fn insert_or_take(&self, key: K, value: V) -> Option<V> {
        let mut shard = self.shard_for(&key).lock();
        match shard.remove(&key) {
            Some(existing) => Some(existing),
            None => {
                shard.insert(key, value);
                None
            }
        }
    }

    /// Total number of entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_insert_with_constructs_once() {
        let map: ShardedMap<String, u32> = ShardedMap::new();
        let calls = AtomicUsize::new(0);
        let first = map.get_or_insert_with("k".to_string(), || {
            calls.fetch_add(1, Ordering::Relaxed);
            7
        });
        let second = map.get_or_insert_with("k".to_string(), || {
            calls.fetch_add(1, Ordering::Relaxed);
            8
        });
        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_or_take_rendezvous() {
        let map: ShardedMap<&'static str, u32> = ShardedMap::new();
        assert_eq!(map.insert_or_take("q1", 1), None);
        assert_eq!(map.insert_or_take("q1", 2), Some(1));
        // The exchange emptied the slot; a third arrival buffers again.
        assert_eq!(map.insert_or_take("q1", 3), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let map: Arc<ShardedMap<u32, u32>> = Arc::new(ShardedMap::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || map.get_or_insert_with(42, move || i))
            })
            .collect();
        let values: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]), "all threads observe one winner");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_concurrent_rendezvous_pairs_exactly_once() {
        let map: Arc<ShardedMap<u32, u32>> = Arc::new(ShardedMap::new());
        let completions = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let map = Arc::clone(&map);
                let completions = Arc::clone(&completions);
                std::thread::spawn(move || {
                    if map.insert_or_take(9, i).is_some() {
                        completions.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(completions.load(Ordering::Relaxed), 1);
        assert!(map.is_empty());
    }
}
