use crate::config::{BridgeConfig, StorageConfig};
use crate::enforcement_engine::{EnforcementEngine, EnforcementResult};
use crate::error::{BridgeError, StoreError, StoreResult};
use crate::rule_vector::{IntentVector, RuleVector};
use crate::storage::{InstallReport, StorageStats, StorageTier, TierCoordinator};
use crate::telemetry::{TelemetryRecorder, TelemetryStats};
use crate::types::{now_ms, RuleBinding};
use log::info;
/// Implements the bridge: the handler surface a transport layer calls into.
///
/// # Architecture
/// - One tier coordinator owns the hot, warm, and cold tiers
/// - One enforcement engine evaluates intents against those tiers
/// - An optional hitlog recorder audits every enforcement call
use std::sync::Arc;

// ================================================================================================
// BRIDGE STRUCTURE
// ================================================================================================

/// The Bridge is the root data structure for rule vectors in the data plane.
///
/// # Thread Safety
/// The bridge is `Send + Sync`; share it across request handlers with `Arc`.
/// No call blocks on a timer or spawns work in the background.
///
/// # Tiered Storage
/// Rule anchors are stored in a 3-tier system:
/// - **Hot**: In-memory LRU cache for frequent access (<1μs)
/// - **Warm**: Memory-mapped file for large caches (~10μs)
/// - **Cold**: SQLite database for overflow (~100μs)
///
/// Lookup chain: hot → warm → cold with automatic promotion to hot on access.
pub struct Bridge {
    tiers: Arc<TierCoordinator>,
    engine: EnforcementEngine,
    telemetry: Option<Arc<TelemetryRecorder>>,
    /// Creation timestamp
    created_at: u64,
}

/// Outcome of installing a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStatus {
    pub rule_id: String,
    /// Persistent tier now holding the rule
    pub persisted_in: StorageTier,
    /// Rules pushed out of the hot cache to make room
    pub demoted: Vec<String>,
    /// Rules moved from warm to cold to make room
    pub overflowed_to_cold: Vec<String>,
}

impl Bridge {
    /// Initializes a Bridge from `POLICY_BRIDGE_*` environment settings.
    pub fn init() -> Result<Self, BridgeError> {
        Self::new(BridgeConfig::from_env()?)
    }

    /// Creates a new Bridge with the specified configuration.
    ///
    /// This initializes:
    /// - Tiered storage (hot → warm → cold), reconciling any crash leftovers
    /// - The hitlog recorder, when telemetry is enabled
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let tiers = Arc::new(TierCoordinator::open(&config.storage)?);

        let telemetry = if config.telemetry.enabled {
            Some(Arc::new(TelemetryRecorder::new(config.telemetry)?))
        } else {
            None
        };

        let engine = EnforcementEngine::with_telemetry(Arc::clone(&tiers), telemetry.clone());

        info!(
            "Bridge ready (telemetry {})",
            if telemetry.is_some() { "on" } else { "off" }
        );

        Ok(Bridge {
            tiers,
            engine,
            telemetry,
            created_at: now_ms(),
        })
    }

    /// Creates a Bridge with default storage paths and telemetry off.
    ///
    /// Storage paths default to:
    /// - Warm: `./var/data/warm_storage.bin`
    /// - Cold: `./var/data/cold_storage.db`
    pub fn with_defaults() -> Result<Self, BridgeError> {
        Self::new(BridgeConfig::new(StorageConfig::default()))
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn tiers(&self) -> &Arc<TierCoordinator> {
        &self.tiers
    }

    // ============================================================================================
    // HANDLERS
    // ============================================================================================

    /// Evaluate an intent against the bindings that apply to it.
    pub fn enforce(&self, intent: &IntentVector, bindings: &[RuleBinding]) -> EnforcementResult {
        self.engine.enforce(intent, bindings)
    }

    /// Install (or replace) a rule. `rule_id` must match the vector's id.
    pub fn install_rule(&self, rule_id: &str, vector: RuleVector) -> StoreResult<InstallStatus> {
        if vector.rule_id != rule_id {
            return Err(StoreError::invalid(
                rule_id,
                format!("vector carries rule_id '{}'", vector.rule_id),
            ));
        }

        let report = self.tiers.install(vector)?;
        let persisted_in = if report.overflowed_to_cold.iter().any(|id| id == rule_id) {
            StorageTier::Cold
        } else {
            StorageTier::Warm
        };

        Ok(InstallStatus {
            rule_id: rule_id.to_string(),
            persisted_in,
            demoted: report.demoted,
            overflowed_to_cold: report.overflowed_to_cold,
        })
    }

    /// Add multiple rules in a batch (one warm rebuild for the whole batch)
    pub fn install_rules_batch(&self, vectors: Vec<RuleVector>) -> StoreResult<InstallReport> {
        self.tiers.install_batch(vectors)
    }

    /// Remove a rule from every tier. Returns whether it existed anywhere.
    pub fn remove_rule(&self, rule_id: &str) -> StoreResult<bool> {
        self.tiers.remove(rule_id)
    }

    /// Get rule anchors with tiered lookup and automatic promotion.
    pub fn get_rule_vector(&self, rule_id: &str) -> StoreResult<Option<RuleVector>> {
        self.tiers.get(rule_id)
    }

    /// Every installed rule id, sorted.
    pub fn list_rule_ids(&self) -> StoreResult<Vec<String>> {
        self.tiers.list_ids()
    }

    // ============================================================================================
    // STATISTICS
    // ============================================================================================

    /// Returns storage statistics across all tiers.
    ///
    /// Includes:
    /// - Number of rule anchors in each tier (hot, warm, cold)
    /// - Hit/miss counts per tier
    /// - Promotion, demotion, and overflow counts
    pub fn storage_stats(&self) -> StoreResult<StorageStats> {
        self.tiers.stats()
    }

    /// Hitlog counters, or `None` when telemetry is off.
    pub fn telemetry_stats(&self) -> Option<TelemetryStats> {
        self.telemetry.as_ref().map(|t| t.stats())
    }
}

// ================================================================================================
// TESTS
// ================================================================================================
