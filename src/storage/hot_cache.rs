//! LRU hot cache implementation for rule vectors.
//!
//! The hot cache keeps the most recently used rules in memory and evicts
//! exactly one least-recently-used entry when a new rule arrives at capacity.
//!
//! **Algorithm**: strict LRU over a monotonically increasing access tick
//! - Each entry stores `(tick, rule_vector)`; `recency` maps tick → rule_id
//! - Ticks are assigned under the cache mutex, so no two entries share a recency
//!   and concurrent bursts are ordered by lock acquisition
//! - Eviction pops the smallest tick: O(log n)
//! - The evicted entry is handed back to the caller for demotion

use crate::rule_vector::RuleVector;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Hot cache configuration constants
pub const DEFAULT_HOT_CAPACITY: usize = 10_000;

/// Statistics about hot cache usage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotCacheStats {
    /// Number of rules currently in cache
    pub entries: usize,
    /// Cache capacity
    pub capacity: usize,
    /// Total entries evicted by capacity pressure
    pub total_evictions: u64,
}

#[derive(Debug)]
struct HotEntry {
    tick: u64,
    vector: RuleVector,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<String, HotEntry>,
    /// tick → rule_id, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    evictions: u64,
}

impl LruState {
    fn advance(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, rule_id: &str) -> Option<RuleVector> {
        let tick = self.advance();
        let entry = self.entries.get_mut(rule_id)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, rule_id.to_string());
        Some(entry.vector.clone())
    }

    fn upsert(
        &mut self,
        rule_id: String,
        vector: RuleVector,
        capacity: usize,
    ) -> Option<(String, RuleVector)> {
        let tick = self.advance();

        if let Some(entry) = self.entries.get_mut(&rule_id) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.vector = vector;
            self.recency.insert(tick, rule_id);
            return None;
        }

        let evicted = if self.entries.len() >= capacity {
            self.evict_lru()
        } else {
            None
        };

        self.recency.insert(tick, rule_id.clone());
        self.entries.insert(rule_id, HotEntry { tick, vector });
        evicted
    }

    fn evict_lru(&mut self) -> Option<(String, RuleVector)> {
        let (_, rule_id) = self.recency.pop_first()?;
        let entry = self.entries.remove(&rule_id)?;
        self.evictions += 1;
        Some((rule_id, entry.vector))
    }

    fn take(&mut self, rule_id: &str) -> Option<RuleVector> {
        let entry = self.entries.remove(rule_id)?;
        self.recency.remove(&entry.tick);
        Some(entry.vector)
    }
}

/// Bounded in-memory rule cache with strict LRU eviction.
#[derive(Debug)]
pub struct HotCache {
    state: Mutex<LruState>,
    /// Maximum number of entries before eviction
    capacity: usize,
}

impl HotCache {
    /// Create a new hot cache with default capacity (10K).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HOT_CAPACITY)
    }

    /// Create a new hot cache with specified capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Get a rule and mark it most-recently-used.
    pub fn get(&self, rule_id: &str) -> Option<RuleVector> {
        self.state.lock().touch(rule_id)
    }

    /// Get a rule WITHOUT updating its recency.
    pub fn peek(&self, rule_id: &str) -> Option<RuleVector> {
        self.state
            .lock()
            .entries
            .get(rule_id)
            .map(|entry| entry.vector.clone())
    }

    /// Insert or overwrite a rule and mark it most-recently-used.
    ///
    /// When a new rule arrives at capacity, the least-recently-used entry is
    /// evicted and returned so the caller can demote it.
    pub fn put(&self, rule_id: String, vector: RuleVector) -> Option<(String, RuleVector)> {
        self.state.lock().upsert(rule_id, vector, self.capacity)
    }

    /// Remove a rule from the cache. Idempotent.
    pub fn remove(&self, rule_id: &str) -> Option<RuleVector> {
        self.state.lock().take(rule_id)
    }

    /// Check if a rule exists in the cache.
    pub fn contains(&self, rule_id: &str) -> bool {
        self.state.lock().entries.contains_key(rule_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Rule ids ordered from least to most recently used.
    pub fn ids_by_recency(&self) -> Vec<String> {
        self.state.lock().recency.values().cloned().collect()
    }

    /// Take a snapshot of the current cache entries (rule_id → RuleVector).
    pub fn snapshot(&self) -> HashMap<String, RuleVector> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(rule_id, entry)| (rule_id.clone(), entry.vector.clone()))
            .collect()
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> HotCacheStats {
        let state = self.state.lock();
        HotCacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            total_evictions: state.evictions,
        }
    }
}

impl Default for HotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_vector::SliceAnchors;

    fn vector(rule_id: &str, marker: f32) -> RuleVector {
        let mut anchors = SliceAnchors::default();
        anchors.action[0] = marker;
        RuleVector::new(rule_id, anchors, [0.5; 4])
    }

    #[test]
    fn test_put_and_get() {
        let cache = HotCache::with_capacity(100);
        assert!(cache.put("rule-1".to_string(), vector("rule-1", 1.0)).is_none());
        assert!(cache.contains("rule-1"));
        assert_eq!(cache.get("rule-1").unwrap().anchors.action[0], 1.0);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = HotCache::with_capacity(2);
        cache.put("rule-1".to_string(), vector("rule-1", 1.0));
        cache.put("rule-2".to_string(), vector("rule-2", 2.0));

        // Overwriting at capacity must not evict anything
        assert!(cache.put("rule-1".to_string(), vector("rule-1", 3.0)).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("rule-1").unwrap().anchors.action[0], 3.0);
        assert_eq!(cache.stats().total_evictions, 0);
    }

    #[test]
    fn test_evicts_exactly_the_lru_entry() {
        let cache = HotCache::with_capacity(3);
        for i in 0..3 {
            let id = format!("rule-{}", i);
            cache.put(id.clone(), vector(&id, i as f32));
        }

        // rule-0 becomes most recent, rule-1 is now the LRU entry
        cache.get("rule-0");

        let (evicted_id, evicted) = cache
            .put("rule-3".to_string(), vector("rule-3", 3.0))
            .unwrap();
        assert_eq!(evicted_id, "rule-1");
        assert_eq!(evicted.rule_id, "rule-1");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().total_evictions, 1);
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let cache = HotCache::with_capacity(2);
        cache.put("a".to_string(), vector("a", 0.0));
        cache.put("b".to_string(), vector("b", 0.0));

        cache.peek("a");
        let (evicted_id, _) = cache.put("c".to_string(), vector("c", 0.0)).unwrap();
        assert_eq!(evicted_id, "a");
    }

    #[test]
    fn test_recency_order() {
        let cache = HotCache::with_capacity(10);
        for id in ["a", "b", "c"] {
            cache.put(id.to_string(), vector(id, 0.0));
        }
        cache.get("a");
        assert_eq!(cache.ids_by_recency(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = HotCache::with_capacity(4);
        cache.put("a".to_string(), vector("a", 0.0));
        assert!(cache.remove("a").is_some());
        assert!(cache.remove("a").is_none());
        assert!(cache.is_empty());
        assert!(cache.ids_by_recency().is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = HotCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a".to_string(), vector("a", 0.0));
        assert!(cache.contains("a"));
    }
}
