//! Storage data structures shared by the hot, warm, and cold tiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Storage tier levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Bounded LRU map (<1μs latency)
    Hot,
    /// Memory-mapped file (~10μs latency)
    Warm,
    /// SQLite database (~100μs latency)
    Cold,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Hot => write!(f, "hot"),
            StorageTier::Warm => write!(f, "warm"),
            StorageTier::Cold => write!(f, "cold"),
        }
    }
}

/// Statistics about storage tier usage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Number of rules in hot cache
    pub hot_rules: usize,
    /// Hot cache capacity
    pub hot_capacity: usize,
    /// Number of rules in warm storage
    pub warm_rules: usize,
    /// Warm storage capacity before overflow to cold
    pub warm_capacity: usize,
    /// Number of rules in cold storage
    pub cold_rules: usize,
    /// Lookups served from hot tier
    pub hot_hits: u64,
    /// Lookups served from warm tier
    pub warm_hits: u64,
    /// Lookups served from cold tier
    pub cold_hits: u64,
    /// Lookups that missed every tier
    pub misses: u64,
    /// Entries copied into hot from a lower tier
    pub promotions: u64,
    /// Entries pushed out of hot by capacity pressure
    pub demotions: u64,
    /// Entries moved from warm to cold by capacity pressure
    pub warm_overflows: u64,
}

/// Lock-free counters owned by the tier coordinator.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    pub hot_hits: AtomicU64,
    pub warm_hits: AtomicU64,
    pub cold_hits: AtomicU64,
    pub misses: AtomicU64,
    pub promotions: AtomicU64,
    pub demotions: AtomicU64,
    pub warm_overflows: AtomicU64,
}

impl TierCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy the counters into a stats snapshot; tier sizes are left to the caller.
    pub fn fill(&self, stats: &mut StorageStats) {
        stats.hot_hits = self.hot_hits.load(Ordering::Relaxed);
        stats.warm_hits = self.warm_hits.load(Ordering::Relaxed);
        stats.cold_hits = self.cold_hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.promotions = self.promotions.load(Ordering::Relaxed);
        stats.demotions = self.demotions.load(Ordering::Relaxed);
        stats.warm_overflows = self.warm_overflows.load(Ordering::Relaxed);
    }
}
