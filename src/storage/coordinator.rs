//! Tier coordinator - the single owner of the hot, warm, and cold tiers.
//!
//! Placement model:
//! - Every installed rule is persisted in exactly one of warm or cold.
//! - The hot cache holds read-through copies of persisted rules. A hot copy is
//!   always identical to the persisted one, so an id never resolves to two
//!   different vectors.
//! - Lookups resolve hot → warm → cold and copy lower-tier hits into hot
//!   (cold hits bypass warm). Capacity pressure pushes the hot LRU entry out
//!   (its persisted copy remains) and moves the oldest warm entries into cold.
//!
//! Locking: tier locks are taken one at a time and released before the next
//! tier is touched. `writes` serializes install/remove against each other and
//! against the lookup miss path; hot hits never wait on it.
//!
//! Install stamps come from a clock that never repeats or runs backwards, so
//! a later install is always younger than an earlier one, even within the
//! same millisecond.

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::rule_vector::{encode, RuleVector};
use crate::storage::types::TierCounters;
use crate::storage::{ColdStorage, HotCache, StorageStats, StorageTier, WarmStorage};
use crate::types::now_ms;

/// What an install did to the tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Rules written by this call
    pub installed: Vec<String>,
    /// Rules pushed out of the hot cache to make room
    pub demoted: Vec<String>,
    /// Rules moved from warm to cold to make room
    pub overflowed_to_cold: Vec<String>,
}

/// Unifies the three storage tiers behind one lookup/install/remove API.
#[derive(Debug)]
pub struct TierCoordinator {
    hot: HotCache,
    warm: WarmStorage,
    cold: ColdStorage,
    warm_capacity: usize,
    writes: RwLock<()>,
    /// Last install stamp handed out; only advanced under `writes`
    last_stamp: AtomicU64,
    counters: TierCounters,
}

impl TierCoordinator {
    /// Open all three tiers described by `config`.
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        let hot = HotCache::with_capacity(config.hot_capacity);
        let warm = WarmStorage::open(&config.warm_storage_path)?;
        let cold = ColdStorage::open(&config.cold_storage_path)?;
        Self::new(hot, warm, cold, config.warm_capacity)
    }

    /// Take ownership of already-opened tiers and reconcile them.
    pub fn new(
        hot: HotCache,
        warm: WarmStorage,
        cold: ColdStorage,
        warm_capacity: usize,
    ) -> StoreResult<Self> {
        let newest_warm = warm.install_times().into_values().max().unwrap_or(0);
        let coordinator = Self {
            hot,
            warm,
            cold,
            warm_capacity: warm_capacity.max(1),
            writes: RwLock::new(()),
            last_stamp: AtomicU64::new(newest_warm),
            counters: TierCounters::default(),
        };

        coordinator.reconcile()?;
        info!(
            "Tier coordinator ready: hot capacity {}, warm {} / {}, cold {}",
            coordinator.hot.capacity(),
            coordinator.warm.len(),
            coordinator.warm_capacity,
            coordinator.cold.count()?
        );
        Ok(coordinator)
    }

    // ============================================================================================
    // LOOKUP
    // ============================================================================================

    /// Resolve a rule id through hot → warm → cold, promoting lower-tier hits.
    pub fn get(&self, rule_id: &str) -> StoreResult<Option<RuleVector>> {
        if let Some(vector) = self.hot.get(rule_id) {
            TierCounters::bump(&self.counters.hot_hits);
            return Ok(Some(vector));
        }

        let _lookup = self.writes.read();

        // An install or promotion may have landed while we waited
        if let Some(vector) = self.hot.get(rule_id) {
            TierCounters::bump(&self.counters.hot_hits);
            return Ok(Some(vector));
        }

        if let Some(vector) = logged(self.warm.get(rule_id), "warm lookup", rule_id)? {
            TierCounters::bump(&self.counters.warm_hits);
            self.promote(&vector, StorageTier::Warm);
            return Ok(Some(vector));
        }

        if let Some(vector) = logged(self.cold.get(rule_id), "cold lookup", rule_id)? {
            TierCounters::bump(&self.counters.cold_hits);
            self.promote(&vector, StorageTier::Cold);
            return Ok(Some(vector));
        }

        TierCounters::bump(&self.counters.misses);
        Ok(None)
    }

    /// Like [`get`](Self::get), but a miss is [`StoreError::NotFound`].
    pub fn require(&self, rule_id: &str) -> StoreResult<RuleVector> {
        self.get(rule_id)?.ok_or_else(|| StoreError::NotFound {
            rule_id: rule_id.to_string(),
        })
    }

    fn promote(&self, vector: &RuleVector, from: StorageTier) {
        TierCounters::bump(&self.counters.promotions);
        debug!("Promoting '{}' from {} to hot", vector.rule_id, from);
        let victim = self.hot.put(vector.rule_id.clone(), vector.clone());
        self.note_demotions(victim.into_iter().map(|(id, _)| id));
    }

    fn note_demotions(&self, victims: impl IntoIterator<Item = String>) -> Vec<String> {
        let victims: Vec<String> = victims.into_iter().collect();
        for victim in &victims {
            debug!("Demoted '{}' out of hot cache", victim);
        }
        TierCounters::add(&self.counters.demotions, victims.len() as u64);
        victims
    }

    // ============================================================================================
    // INSTALL / REMOVE
    // ============================================================================================

    /// Install (or replace) a single rule vector.
    pub fn install(&self, vector: RuleVector) -> StoreResult<InstallReport> {
        self.install_batch(vec![vector])
    }

    /// Install many rule vectors with a single warm rebuild.
    ///
    /// Every vector in the call shares one install stamp, strictly newer than
    /// any earlier call's. Vectors go to hot first, then are persisted into
    /// warm; if warm exceeds its capacity, its oldest entries move into cold.
    /// On a persistence failure the new hot entries are rolled back and the
    /// error is returned.
    pub fn install_batch(&self, vectors: Vec<RuleVector>) -> StoreResult<InstallReport> {
        if vectors.is_empty() {
            return Ok(InstallReport {
                installed: vec![],
                demoted: vec![],
                overflowed_to_cold: vec![],
            });
        }

        for vector in &vectors {
            vector.validate()?;
        }

        let _install = self.writes.write();

        let installed_at = self.next_stamp();
        let vectors: Vec<RuleVector> = vectors
            .into_iter()
            .map(|mut v| {
                v.installed_at_ms = installed_at;
                v
            })
            .collect();
        let installed: Vec<String> = vectors.iter().map(|v| v.rule_id.clone()).collect();

        // 1. Hot
        let mut victims = Vec::new();
        for vector in &vectors {
            if let Some((victim, _)) = self.hot.put(vector.rule_id.clone(), vector.clone()) {
                victims.push(victim);
            }
        }
        let demoted = self.note_demotions(victims);

        // 2. Warm (and cold on overflow)
        match self.persist(vectors) {
            Ok(overflowed_to_cold) => {
                debug!(
                    "Installed {} rules ({} demoted from hot, {} overflowed to cold)",
                    installed.len(),
                    demoted.len(),
                    overflowed_to_cold.len()
                );
                Ok(InstallReport {
                    installed,
                    demoted,
                    overflowed_to_cold,
                })
            }
            Err(e) => {
                error!("Install of {} rules failed: {}", installed.len(), e);
                for rule_id in &installed {
                    self.hot.remove(rule_id);
                }
                Err(e)
            }
        }
    }

    /// Wall-clock milliseconds, bumped past the previous stamp when the
    /// clock has not moved. Callers hold `writes`.
    fn next_stamp(&self) -> u64 {
        let previous = self.last_stamp.load(Ordering::Relaxed);
        let stamp = now_ms().max(previous + 1);
        self.last_stamp.store(stamp, Ordering::Relaxed);
        stamp
    }

    /// Write `vectors` into warm, spilling the oldest warm entries into cold.
    ///
    /// Only the install times in the warm index are consulted to choose the
    /// overflow, and records already in warm move to cold as raw bytes, so an
    /// undecodable warm record never blocks an install.
    fn persist(&self, vectors: Vec<RuleVector>) -> StoreResult<Vec<String>> {
        let mut incoming: HashMap<String, RuleVector> = HashMap::new();
        for vector in vectors {
            incoming.insert(vector.rule_id.clone(), vector);
        }

        let mut ages = self.warm.install_times();
        for vector in incoming.values() {
            ages.insert(vector.rule_id.clone(), vector.installed_at_ms);
        }
        let overflow = oldest_beyond(&ages, self.warm_capacity);

        // Cold first: an overflowed rule must never be absent from both tiers
        let mut to_cold = Vec::with_capacity(overflow.len());
        for rule_id in &overflow {
            let record = match incoming.remove(rule_id) {
                Some(vector) => Some(encode(&vector)?),
                None => self.warm.raw_record(rule_id),
            };
            if let Some(record) = record {
                to_cold.push((rule_id.clone(), record));
            }
        }
        self.cold.upsert_records(&to_cold)?;

        let upserts: Vec<RuleVector> = incoming.into_values().collect();
        let removals: HashSet<&str> = overflow.iter().map(String::as_str).collect();
        self.warm.rebuild_with(&upserts, &removals)?;

        // Stale cold copies of ids now in warm. The install has already taken
        // effect; a leftover copy is older and is dropped on the next open.
        for vector in &upserts {
            if let Err(e) = self.cold.remove(&vector.rule_id) {
                warn!(
                    "Stale cold copy of '{}' left behind after install: {}",
                    vector.rule_id, e
                );
            }
        }

        TierCounters::add(&self.counters.warm_overflows, overflow.len() as u64);
        Ok(overflow)
    }

    /// Delete a rule from every tier. Returns whether any tier held it.
    ///
    /// All three tiers are attempted even if one fails; the first error is
    /// returned after the others have been tried.
    pub fn remove(&self, rule_id: &str) -> StoreResult<bool> {
        let _remove = self.writes.write();

        let in_hot = self.hot.remove(rule_id).is_some();

        let warm_result = if self.warm.contains(rule_id) {
            let removals: HashSet<&str> = [rule_id].into_iter().collect();
            self.warm.rebuild_with(&[], &removals).map(|_| true)
        } else {
            Ok(false)
        };

        let cold_result = self.cold.remove(rule_id);

        let in_warm = logged(warm_result, "warm remove", rule_id)?;
        let in_cold = logged(cold_result, "cold remove", rule_id)?;

        debug!(
            "Removed '{}' (hot: {}, warm: {}, cold: {})",
            rule_id, in_hot, in_warm, in_cold
        );
        Ok(in_hot || in_warm || in_cold)
    }

    // ============================================================================================
    // RECONCILIATION
    // ============================================================================================

    /// Resolve ids persisted in both warm and cold, left behind by a crash
    /// between the two writes of a cascade. The newer copy wins; ties go to
    /// warm. An unreadable copy loses to a readable one.
    fn reconcile(&self) -> StoreResult<()> {
        let warm_ids: HashSet<String> = self.warm.ids().into_iter().collect();
        let duplicates: Vec<String> = self
            .cold
            .list_ids()?
            .into_iter()
            .filter(|id| warm_ids.contains(id))
            .collect();

        if duplicates.is_empty() {
            return Ok(());
        }

        let mut newer_in_cold = Vec::new();
        for rule_id in &duplicates {
            let warm = readable(self.warm.get(rule_id), StorageTier::Warm, rule_id);
            let cold = readable(self.cold.get(rule_id), StorageTier::Cold, rule_id);
            match (warm, cold) {
                (Some(warm), Some(cold)) if cold.installed_at_ms > warm.installed_at_ms => {
                    newer_in_cold.push(cold)
                }
                (None, Some(cold)) => newer_in_cold.push(cold),
                _ => {}
            }
        }

        if !newer_in_cold.is_empty() {
            self.warm.rebuild_with(&newer_in_cold, &HashSet::new())?;
        }

        for rule_id in &duplicates {
            self.cold.remove(rule_id)?;
        }

        info!(
            "Reconciled {} rules persisted in both warm and cold",
            duplicates.len()
        );
        Ok(())
    }

    // ============================================================================================
    // DIAGNOSTICS
    // ============================================================================================

    /// Tiers currently holding a copy of `rule_id`, fastest first.
    pub fn locate(&self, rule_id: &str) -> StoreResult<Vec<StorageTier>> {
        let mut tiers = Vec::new();
        if self.hot.contains(rule_id) {
            tiers.push(StorageTier::Hot);
        }
        if self.warm.contains(rule_id) {
            tiers.push(StorageTier::Warm);
        }
        if self.cold.contains(rule_id)? {
            tiers.push(StorageTier::Cold);
        }
        Ok(tiers)
    }

    /// Every rule id known to any tier, sorted.
    pub fn list_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids: BTreeSet<String> = self.warm.ids().into_iter().collect();
        ids.extend(self.cold.list_ids()?);
        ids.extend(self.hot.snapshot().into_keys());
        Ok(ids.into_iter().collect())
    }

    pub fn stats(&self) -> StoreResult<StorageStats> {
        let mut stats = StorageStats {
            hot_rules: self.hot.len(),
            hot_capacity: self.hot.capacity(),
            warm_rules: self.warm.len(),
            warm_capacity: self.warm_capacity,
            cold_rules: self.cold.count()?,
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        Ok(stats)
    }
}

/// Ids beyond `capacity`, oldest first (by install time, then id).
fn oldest_beyond(ages: &HashMap<String, u64>, capacity: usize) -> Vec<String> {
    if ages.len() <= capacity {
        return Vec::new();
    }

    let mut by_age: Vec<(u64, &String)> = ages
        .iter()
        .map(|(rule_id, installed_at)| (*installed_at, rule_id))
        .collect();
    by_age.sort();

    let excess = ages.len() - capacity;
    by_age
        .into_iter()
        .take(excess)
        .map(|(_, rule_id)| rule_id.clone())
        .collect()
}

/// A decode failure while resolving duplicates counts as "no usable copy".
fn readable(
    result: StoreResult<Option<RuleVector>>,
    tier: StorageTier,
    rule_id: &str,
) -> Option<RuleVector> {
    result.unwrap_or_else(|e| {
        warn!("Unreadable {} copy of '{}' during reconcile: {}", tier, rule_id, e);
        None
    })
}

/// Log storage failures at the coordinator boundary; pass the result through.
fn logged<T>(result: StoreResult<T>, op: &str, rule_id: &str) -> StoreResult<T> {
    if let Err(ref e) = result {
        match e {
            StoreError::StorageIo { .. } => error!("{} for '{}' failed: {}", op, rule_id, e),
            _ => debug!("{} for '{}' failed: {}", op, rule_id, e),
        }
    }
    result
}
