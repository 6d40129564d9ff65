//! Integration tests for the tier coordinator.
//!
//! Tests verify:
//! - Demotion out of hot and promotion back on access
//! - Each rule persisted in exactly one of warm or cold
//! - Warm overflow into cold, oldest first
//! - Reinstall and removal across every tier
//! - Persistence across reopen
//! - Concurrent installs and lookups

use policy_bridge::config::StorageConfig;
use policy_bridge::rule_vector::{RuleVector, SliceAnchors, RECORD_VERSION};
use policy_bridge::storage::{ColdStorage, StorageTier, TierCoordinator};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn create_test_vector(rule_id: &str, marker: f32) -> RuleVector {
    let mut anchors = SliceAnchors::default();
    anchors.action[0] = marker;
    anchors.resource[1] = 1.0;
    RuleVector::new(rule_id, anchors, [0.5; 4])
}

fn open(dir: &tempfile::TempDir, hot: usize, warm: usize) -> TierCoordinator {
    let config = StorageConfig::in_dir(dir.path()).with_capacities(hot, warm);
    TierCoordinator::open(&config).unwrap()
}

fn persistent_tiers(tiers: &TierCoordinator, rule_id: &str) -> Vec<StorageTier> {
    tiers
        .locate(rule_id)
        .unwrap()
        .into_iter()
        .filter(|tier| *tier != StorageTier::Hot)
        .collect()
}

// ============================================================================
// DEMOTION AND PROMOTION TESTS
// ============================================================================

#[test]
fn test_hot_overflow_demotes_exactly_one_and_promotes_back() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 3, 100);

    for i in 0..3 {
        let report = tiers
            .install(create_test_vector(&format!("rule-{}", i), i as f32))
            .unwrap();
        assert!(report.demoted.is_empty());
    }

    let report = tiers.install(create_test_vector("rule-3", 3.0)).unwrap();
    assert_eq!(report.demoted, vec!["rule-0"]);

    let stats = tiers.stats().unwrap();
    assert_eq!(stats.demotions, 1);
    assert_eq!(stats.hot_rules, 3);
    assert_eq!(stats.warm_rules, 4);
    assert_eq!(tiers.locate("rule-0").unwrap(), vec![StorageTier::Warm]);

    // Demoted rule is still retrievable and comes back into hot
    let vector = tiers.get("rule-0").unwrap().unwrap();
    assert_eq!(vector.anchors.action[0], 0.0);
    assert_eq!(
        tiers.locate("rule-0").unwrap(),
        vec![StorageTier::Hot, StorageTier::Warm]
    );

    let stats = tiers.stats().unwrap();
    assert_eq!(stats.warm_hits, 1);
    assert_eq!(stats.promotions, 1);
    // Promotion at capacity pushes the next LRU entry out
    assert_eq!(stats.demotions, 2);
    assert_eq!(stats.hot_rules, 3);
}

#[test]
fn test_cold_hit_promotes_straight_to_hot() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 1, 1);

    tiers.install(create_test_vector("a-old", 1.0)).unwrap();
    let report = tiers.install(create_test_vector("b-new", 2.0)).unwrap();
    assert_eq!(report.overflowed_to_cold, vec!["a-old"]);
    assert_eq!(tiers.locate("a-old").unwrap(), vec![StorageTier::Cold]);

    assert_eq!(tiers.get("a-old").unwrap().unwrap().anchors.action[0], 1.0);
    assert_eq!(
        tiers.locate("a-old").unwrap(),
        vec![StorageTier::Hot, StorageTier::Cold]
    );

    let stats = tiers.stats().unwrap();
    assert_eq!(stats.cold_hits, 1);
    assert_eq!(stats.warm_rules, 1);
    assert_eq!(stats.cold_rules, 1);
}

// ============================================================================
// PLACEMENT TESTS
// ============================================================================

#[test]
fn test_each_rule_persisted_in_exactly_one_tier() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 2, 2);

    for i in 0..5 {
        tiers
            .install(create_test_vector(&format!("rule-{}", i), i as f32))
            .unwrap();
    }

    for i in 0..5 {
        let rule_id = format!("rule-{}", i);
        assert_eq!(persistent_tiers(&tiers, &rule_id).len(), 1, "{}", rule_id);
    }

    // Oldest three overflowed into cold
    for i in 0..3 {
        assert_eq!(
            persistent_tiers(&tiers, &format!("rule-{}", i)),
            vec![StorageTier::Cold]
        );
    }
    let stats = tiers.stats().unwrap();
    assert_eq!(stats.warm_rules, 2);
    assert_eq!(stats.cold_rules, 3);
    assert_eq!(stats.warm_overflows, 3);
}

#[test]
fn test_reinstall_replaces_everywhere() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 4, 1);

    tiers.install(create_test_vector("b-rule", 1.0)).unwrap();
    tiers.install(create_test_vector("c-other", 0.0)).unwrap();
    assert_eq!(persistent_tiers(&tiers, "b-rule"), vec![StorageTier::Cold]);

    // The new copy is now the newest; it lands in warm and the stale cold copy is dropped
    tiers.install(create_test_vector("b-rule", 2.0)).unwrap();
    assert_eq!(persistent_tiers(&tiers, "b-rule"), vec![StorageTier::Warm]);
    assert_eq!(tiers.get("b-rule").unwrap().unwrap().anchors.action[0], 2.0);
    assert_eq!(persistent_tiers(&tiers, "c-other"), vec![StorageTier::Cold]);
}

#[test]
fn test_back_to_back_installs_overflow_the_older_rule() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 4, 1);

    // Same millisecond in practice; the older id sorts last
    for round in 0..20 {
        let older = format!("z-older-{}", round);
        let newer = format!("a-newer-{}", round);
        tiers.install(create_test_vector(&older, 1.0)).unwrap();
        let report = tiers.install(create_test_vector(&newer, 2.0)).unwrap();

        assert_eq!(report.overflowed_to_cold, vec![older.clone()]);
        assert_eq!(persistent_tiers(&tiers, &newer), vec![StorageTier::Warm]);
        assert_eq!(persistent_tiers(&tiers, &older), vec![StorageTier::Cold]);
    }
}

#[test]
fn test_batch_install_rebuilds_once() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 10, 3);

    let batch: Vec<RuleVector> = (0..5)
        .map(|i| create_test_vector(&format!("rule-{}", i), i as f32))
        .collect();
    let report = tiers.install_batch(batch).unwrap();

    assert_eq!(report.installed.len(), 5);
    // Same install time: ties break by id
    assert_eq!(report.overflowed_to_cold, vec!["rule-0", "rule-1"]);
    assert_eq!(tiers.list_ids().unwrap().len(), 5);
}

#[test]
fn test_invalid_batch_installs_nothing() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 10, 10);

    let mut bad = create_test_vector("bad", 0.0);
    bad.anchors.data[3] = f32::NAN;
    let result = tiers.install_batch(vec![create_test_vector("good", 0.0), bad]);

    assert!(result.is_err());
    assert!(tiers.list_ids().unwrap().is_empty());
}

// ============================================================================
// REMOVAL TESTS
// ============================================================================

#[test]
fn test_remove_from_every_tier() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = open(&tmp_dir, 1, 1);

    tiers.install(create_test_vector("a-cold", 0.0)).unwrap();
    tiers.install(create_test_vector("b-warm", 0.0)).unwrap();
    tiers.get("a-cold").unwrap();

    assert!(tiers.remove("a-cold").unwrap());
    assert!(tiers.locate("a-cold").unwrap().is_empty());
    assert!(tiers.get("a-cold").unwrap().is_none());

    assert!(tiers.remove("b-warm").unwrap());
    assert!(!tiers.remove("b-warm").unwrap());
    assert!(tiers.list_ids().unwrap().is_empty());
}

// ============================================================================
// CORRUPTION TESTS
// ============================================================================

/// Overwrite the version byte of the first warm record (the metadata line is
/// 200 bytes plus a newline, and records are sorted by id).
fn corrupt_first_warm_record(config: &StorageConfig) {
    let mut bytes = std::fs::read(&config.warm_storage_path).unwrap();
    bytes[201] = RECORD_VERSION.wrapping_add(98);
    std::fs::write(&config.warm_storage_path, &bytes).unwrap();
}

#[test]
fn test_corrupt_warm_record_does_not_block_writes() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::in_dir(tmp_dir.path()).with_capacities(4, 4);

    {
        let tiers = TierCoordinator::open(&config).unwrap();
        tiers.install(create_test_vector("a", 1.0)).unwrap();
        tiers.install(create_test_vector("b", 2.0)).unwrap();
    }
    corrupt_first_warm_record(&config);

    let tiers = TierCoordinator::open(&config).unwrap();
    assert!(tiers.get("a").is_err());
    assert_eq!(tiers.get("b").unwrap().unwrap().anchors.action[0], 2.0);

    tiers.install(create_test_vector("c", 3.0)).unwrap();
    assert_eq!(tiers.get("c").unwrap().unwrap().anchors.action[0], 3.0);

    assert!(tiers.remove("b").unwrap());
    assert!(tiers.remove("a").unwrap());
    assert_eq!(tiers.list_ids().unwrap(), vec!["c"]);
    drop(tiers);

    let reopened = TierCoordinator::open(&config).unwrap();
    assert_eq!(reopened.list_ids().unwrap(), vec!["c"]);
    assert!(reopened.get("c").unwrap().is_some());
}

#[test]
fn test_corrupt_warm_record_overflows_to_cold_as_is() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::in_dir(tmp_dir.path()).with_capacities(4, 2);

    {
        let tiers = TierCoordinator::open(&config).unwrap();
        tiers.install(create_test_vector("a", 1.0)).unwrap();
        tiers.install(create_test_vector("b", 2.0)).unwrap();
    }
    corrupt_first_warm_record(&config);

    // "a" is the oldest warm entry, so the next install spills it
    let tiers = TierCoordinator::open(&config).unwrap();
    let report = tiers.install(create_test_vector("c", 3.0)).unwrap();
    assert_eq!(report.overflowed_to_cold, vec!["a"]);
    assert_eq!(persistent_tiers(&tiers, "a"), vec![StorageTier::Cold]);
    assert!(tiers.get("a").is_err());
    assert!(tiers.remove("a").unwrap());
    assert_eq!(tiers.list_ids().unwrap(), vec!["b", "c"]);
}

#[test]
fn test_install_succeeds_when_stale_cold_cleanup_fails() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::in_dir(tmp_dir.path()).with_capacities(4, 4);

    {
        let cold = ColdStorage::open(&config.cold_storage_path).unwrap();
        let mut stale = create_test_vector("r", 1.0);
        stale.installed_at_ms = 1;
        cold.upsert(&stale).unwrap();
    }

    let tiers = TierCoordinator::open(&config).unwrap();

    // Another connection holds the database, so deleting the stale copy fails
    let blocker = rusqlite::Connection::open(&config.cold_storage_path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

    tiers.install(create_test_vector("r", 2.0)).unwrap();
    assert_eq!(tiers.get("r").unwrap().unwrap().anchors.action[0], 2.0);

    blocker.execute_batch("ROLLBACK").unwrap();
    drop(blocker);
    assert_eq!(
        tiers.locate("r").unwrap(),
        vec![StorageTier::Hot, StorageTier::Warm, StorageTier::Cold]
    );
    drop(tiers);

    // The leftover is older and goes away on the next open
    let reopened = TierCoordinator::open(&config).unwrap();
    assert_eq!(reopened.locate("r").unwrap(), vec![StorageTier::Warm]);
    assert_eq!(reopened.get("r").unwrap().unwrap().anchors.action[0], 2.0);
}

// ============================================================================
// PERSISTENCE TESTS
// ============================================================================

#[test]
fn test_rules_survive_reopen() {
    let tmp_dir = tempfile::tempdir().unwrap();

    {
        let tiers = open(&tmp_dir, 2, 2);
        for i in 0..4 {
            tiers
                .install(create_test_vector(&format!("rule-{}", i), i as f32))
                .unwrap();
        }
    }

    let tiers = open(&tmp_dir, 2, 2);
    assert_eq!(tiers.stats().unwrap().hot_rules, 0);
    assert_eq!(
        tiers.list_ids().unwrap(),
        vec!["rule-0", "rule-1", "rule-2", "rule-3"]
    );
    for i in 0..4 {
        let vector = tiers.get(&format!("rule-{}", i)).unwrap().unwrap();
        assert_eq!(vector.anchors.action[0], i as f32);
    }
}

#[test]
fn test_reopen_keeps_cold_only_rules() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::in_dir(tmp_dir.path());

    {
        let cold = ColdStorage::open(&config.cold_storage_path).unwrap();
        cold.upsert(&create_test_vector("legacy", 7.0)).unwrap();
    }

    let tiers = TierCoordinator::open(&config).unwrap();
    assert_eq!(tiers.locate("legacy").unwrap(), vec![StorageTier::Cold]);
    assert_eq!(tiers.require("legacy").unwrap().anchors.action[0], 7.0);
}

// ============================================================================
// CONCURRENT ACCESS TESTS
// ============================================================================

#[test]
fn test_concurrent_install_and_lookup() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let tiers = Arc::new(open(&tmp_dir, 8, 16));
    let mut handles = vec![];

    for thread_id in 0..4 {
        let tiers_clone = Arc::clone(&tiers);
        handles.push(thread::spawn(move || {
            for i in 0..10 {
                let rule_id = format!("rule-{}-{}", thread_id, i);
                tiers_clone
                    .install(create_test_vector(&rule_id, i as f32))
                    .unwrap();

                // An install is visible to every later lookup
                let found = tiers_clone.get(&rule_id).unwrap().unwrap();
                assert_eq!(found.anchors.action[0], i as f32);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let ids: HashSet<String> = tiers.list_ids().unwrap().into_iter().collect();
    assert_eq!(ids.len(), 40);

    let stats = tiers.stats().unwrap();
    assert!(stats.hot_rules <= 8);
    assert_eq!(stats.warm_rules, 16);
    assert_eq!(stats.cold_rules, 24);

    for rule_id in &ids {
        assert_eq!(persistent_tiers(&tiers, rule_id).len(), 1, "{}", rule_id);
        assert!(tiers.get(rule_id).unwrap().is_some());
    }
}
