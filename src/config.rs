//! Configuration for the tiered store and the audit hitlog.
//!
//! Every setting has a default; deployments override them through
//! `POLICY_BRIDGE_*` environment variables.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::storage::hot_cache::DEFAULT_HOT_CAPACITY;
use crate::storage::warm_storage::DEFAULT_WARM_CAPACITY;
use crate::telemetry::TelemetryConfig;

pub const ENV_WARM_PATH: &str = "POLICY_BRIDGE_WARM_PATH";
pub const ENV_COLD_PATH: &str = "POLICY_BRIDGE_COLD_PATH";
pub const ENV_HOT_CAPACITY: &str = "POLICY_BRIDGE_HOT_CAPACITY";
pub const ENV_WARM_CAPACITY: &str = "POLICY_BRIDGE_WARM_CAPACITY";
pub const ENV_HITLOG_DIR: &str = "POLICY_BRIDGE_HITLOG_DIR";
pub const ENV_HITLOG_SAMPLE_RATE: &str = "POLICY_BRIDGE_HITLOG_SAMPLE_RATE";

// ================================================================================================
// STORAGE CONFIGURATION
// ================================================================================================

/// Configuration for tiered storage.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageConfig {
    /// Path to warm storage file (mmap)
    pub warm_storage_path: PathBuf,
    /// Path to cold storage database (SQLite)
    pub cold_storage_path: PathBuf,
    /// Maximum rules held in the hot cache
    pub hot_capacity: usize,
    /// Maximum rules held in warm storage before overflowing to cold
    pub warm_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            warm_storage_path: PathBuf::from("./var/data/warm_storage.bin"),
            cold_storage_path: PathBuf::from("./var/data/cold_storage.db"),
            hot_capacity: DEFAULT_HOT_CAPACITY,
            warm_capacity: DEFAULT_WARM_CAPACITY,
        }
    }
}

impl StorageConfig {
    /// Default capacities with both files placed under `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            warm_storage_path: dir.join("warm_storage.bin"),
            cold_storage_path: dir.join("cold_storage.db"),
            ..Self::default()
        }
    }

    pub fn with_capacities(mut self, hot_capacity: usize, warm_capacity: usize) -> Self {
        self.hot_capacity = hot_capacity;
        self.warm_capacity = warm_capacity;
        self
    }

    /// Defaults overridden by any `POLICY_BRIDGE_*` storage variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = env_value::<PathBuf>(ENV_WARM_PATH)? {
            config.warm_storage_path = path;
        }
        if let Some(path) = env_value::<PathBuf>(ENV_COLD_PATH)? {
            config.cold_storage_path = path;
        }
        if let Some(capacity) = env_value::<usize>(ENV_HOT_CAPACITY)? {
            config.hot_capacity = capacity;
        }
        if let Some(capacity) = env_value::<usize>(ENV_WARM_CAPACITY)? {
            config.warm_capacity = capacity;
        }

        Ok(config)
    }
}

// ================================================================================================
// BRIDGE CONFIGURATION
// ================================================================================================

/// Everything needed to construct a [`Bridge`](crate::bridge::Bridge).
#[derive(Clone, Debug, Default)]
pub struct BridgeConfig {
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl BridgeConfig {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Storage from the environment; the hitlog is enabled when
    /// `POLICY_BRIDGE_HITLOG_DIR` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage = StorageConfig::from_env()?;
        let mut telemetry = TelemetryConfig::default();

        if let Some(dir) = env_value::<String>(ENV_HITLOG_DIR)? {
            telemetry.enabled = true;
            telemetry.hitlog_dir = dir;
        }
        if let Some(rate) = env_value::<f64>(ENV_HITLOG_SAMPLE_RATE)? {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidValue {
                    key: ENV_HITLOG_SAMPLE_RATE.to_string(),
                    value: rate.to_string(),
                    reason: "sample rate must be within [0, 1]".to_string(),
                });
            }
            telemetry.sample_rate = rate;
        }

        Ok(Self { storage, telemetry })
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, raw.trim()).map(Some),
        _ => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
