//! `ResidencyManager`: a byte-budgeted LRU registry with eviction
//! notification, generalized from this lineage's tile-atlas GC
//! (`tiles::atlas::core` selects the oldest retain batch and releases it
//! when the atlas is full) into the flat `(key, bytes, last_used)` record
//! shape spec §3 "Residency entry" describes, independent of any
//! particular GPU resource type.

use std::collections::HashMap;
use std::hash::Hash;

/// One entry evicted by [`ResidencyManager::evict_to_budget`]. The caller
/// is responsible for destroying whatever GPU resource `payload` refers to
/// -- this crate knows nothing about textures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted<K, V> {
    pub key: K,
    pub payload: V,
    pub bytes: u64,
}

struct Entry<V> {
    payload: V,
    bytes: u64,
    last_used: u64,
}

/// A byte-budgeted LRU registry. `touch` bumps recency; `evict_to_budget`
/// removes the least-recently-touched entries until the sum of resident
/// bytes is at or under budget, which is spec §8's "LRU residency bound"
/// invariant: `Σ tile_bytes <= budget` at all times after any mutating call.
pub struct ResidencyManager<K, V> {
    budget_bytes: u64,
    resident_bytes: u64,
    clock: u64,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> ResidencyManager<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            resident_bytes: 0,
            clock: 0,
            entries: HashMap::new(),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn set_budget_bytes(&mut self, budget_bytes: u64) {
        self.budget_bytes = budget_bytes;
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Inserts or replaces an entry and marks it most-recently-used. Does
    /// not evict by itself -- call [`Self::evict_to_budget`] after, so the
    /// caller can choose whether to evict before or after the new entry is
    /// resident (the residency budget invariant only has to hold between
    /// full mutating operations, not mid-insert).
    pub fn insert(&mut self, key: K, payload: V, bytes: u64) -> Option<Evicted<K, V>> {
        let tick = self.next_tick();
        let previous = self.entries.remove(&key);
        if let Some(previous) = &previous {
            self.resident_bytes -= previous.bytes;
        }
        self.resident_bytes += bytes;
        self.entries.insert(
            key,
            Entry {
                payload,
                bytes,
                last_used: tick,
            },
        );
        previous.map(|entry| Evicted {
            key,
            payload: entry.payload,
            bytes: entry.bytes,
        })
    }

    /// Marks `key` as most-recently-used without changing its payload.
    /// A no-op if the key is not resident.
    pub fn touch(&mut self, key: &K) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = tick;
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.resident_bytes -= entry.bytes;
        Some(entry.payload)
    }

    /// Evicts least-recently-touched entries until `resident_bytes <=
    /// budget_bytes`. Returns the evicted entries in eviction order (oldest
    /// first) so the caller can destroy their GPU resources.
    pub fn evict_to_budget(&mut self) -> Vec<Evicted<K, V>> {
        let mut evicted = Vec::new();
        while self.resident_bytes > self.budget_bytes {
            let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key)
            else {
                break;
            };
            let entry = self.entries.remove(&oldest_key).expect("key just found");
            self.resident_bytes -= entry.bytes;
            evicted.push(Evicted {
                key: oldest_key,
                payload: entry.payload,
                bytes: entry.bytes,
            });
        }
        evicted
    }

    /// Removes and returns every entry, e.g. for a full-store teardown.
    pub fn drain_all(&mut self) -> Vec<Evicted<K, V>> {
        self.resident_bytes = 0;
        self.entries
            .drain()
            .map(|(key, entry)| Evicted {
                key,
                payload: entry.payload,
                bytes: entry.bytes,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_under_budget_evicts_nothing() {
        let mut manager: ResidencyManager<u32, &'static str> = ResidencyManager::new(100);
        manager.insert(1, "a", 40);
        manager.insert(2, "b", 40);
        assert!(manager.evict_to_budget().is_empty());
        assert_eq!(manager.resident_bytes(), 80);
    }

    #[test]
    fn eviction_removes_least_recently_used_first() {
        let mut manager: ResidencyManager<u32, &'static str> = ResidencyManager::new(100);
        manager.insert(1, "a", 50);
        manager.insert(2, "b", 50);
        // touching 1 makes 2 the oldest.
        manager.touch(&1);
        manager.insert(3, "c", 50);
        let evicted = manager.evict_to_budget();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, 2);
        assert!(manager.resident_bytes() <= manager.budget_bytes());
    }

    #[test]
    fn eviction_keeps_evicting_until_under_budget() {
        let mut manager: ResidencyManager<u32, u64> = ResidencyManager::new(10);
        for key in 0..5u32 {
            manager.insert(key, key as u64, 10);
        }
        let evicted = manager.evict_to_budget();
        // each insert adds 10 bytes; only the last one should remain resident.
        assert_eq!(evicted.len(), 4);
        assert!(manager.resident_bytes() <= manager.budget_bytes());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn residency_bound_holds_after_every_mutation_sequence() {
        let mut manager: ResidencyManager<u32, ()> = ResidencyManager::new(64);
        for key in 0..20u32 {
            manager.insert(key, (), 13);
            manager.evict_to_budget();
            assert!(manager.resident_bytes() <= manager.budget_bytes());
        }
    }

    #[test]
    fn shrinking_budget_triggers_eviction_on_next_call() {
        let mut manager: ResidencyManager<u32, ()> = ResidencyManager::new(100);
        manager.insert(1, (), 90);
        manager.set_budget_bytes(10);
        let evicted = manager.evict_to_budget();
        assert_eq!(evicted.len(), 1);
        assert_eq!(manager.resident_bytes(), 0);
    }

    #[test]
    fn remove_updates_resident_bytes() {
        let mut manager: ResidencyManager<u32, ()> = ResidencyManager::new(100);
        manager.insert(1, (), 30);
        manager.remove(&1);
        assert_eq!(manager.resident_bytes(), 0);
        assert!(!manager.contains(&1));
    }

    #[test]
    fn drain_all_clears_everything() {
        let mut manager: ResidencyManager<u32, ()> = ResidencyManager::new(100);
        manager.insert(1, (), 30);
        manager.insert(2, (), 30);
        let drained = manager.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(manager.is_empty());
        assert_eq!(manager.resident_bytes(), 0);
    }
}
