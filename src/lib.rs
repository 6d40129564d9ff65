//! # Policy Bridge
//!
//! Tiered rule-vector store and semantic decision engine for agent tool calls.
//!
//! Rules are stored as four-slice anchor vectors across three tiers
//! (hot LRU cache, memory-mapped warm file, SQLite cold overflow). An intent is
//! compared slice by slice against the rules that apply to it and resolves to
//! ALLOW, DENY, MODIFY, STEP_UP, or DEFER.

pub mod bridge;
pub mod config;
pub mod enforcement_engine;
pub mod error;
pub mod rule_vector;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod vector_comparison;

pub use bridge::{Bridge, InstallStatus};
pub use config::{BridgeConfig, StorageConfig};
pub use enforcement_engine::{EnforcementEngine, EnforcementResult, EvidenceStatus, RuleEvidence};
pub use error::{BridgeError, ConfigError, StoreError, StoreResult, TelemetryError};
pub use rule_vector::{IntentVector, RuleVector, SliceAnchors, ANCHOR_DIM};
pub use storage::{StorageStats, StorageTier, TierCoordinator};
pub use telemetry::{TelemetryConfig, TelemetryRecorder, TelemetryStats};
pub use types::{Decision, RuleBinding, Slice};
