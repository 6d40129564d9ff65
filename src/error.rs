//! Error types shared by the storage tiers and the decision engine.

use std::fmt::Display;

use thiserror::Error;

use crate::storage::StorageTier;

/// Errors raised by the tiered store and the enforcement surface.
///
/// A miss in any tier is not an error: lookups return `Ok(None)`. Only
/// [`TierCoordinator::require`](crate::storage::TierCoordinator::require)
/// turns a miss into [`StoreError::NotFound`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file or database is unreadable, corrupt, or out of space.
    #[error("{tier} storage I/O error: {reason}")]
    StorageIo { tier: StorageTier, reason: String },

    /// The rule id is not present in any tier.
    #[error("rule '{rule_id}' not found in any tier")]
    NotFound { rule_id: String },

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// A vector failed shape or range validation.
    #[error("invalid vector '{rule_id}': {reason}")]
    InvalidVector { rule_id: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(tier: StorageTier, reason: impl Display) -> Self {
        StoreError::StorageIo {
            tier,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn serialization(reason: impl Display) -> Self {
        StoreError::Serialization {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(rule_id: &str, reason: impl Display) -> Self {
        StoreError::InvalidVector {
            rule_id: rule_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the audit hitlog.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("hitlog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hitlog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while constructing a [`Bridge`](crate::bridge::Bridge).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
