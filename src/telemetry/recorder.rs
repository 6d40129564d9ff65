//! # Telemetry Recorder
//!
//! Thread-safe sampling front-end for the hitlog writer.

use super::session::EnforcementSession;
use super::writer::{HitlogConfig, HitlogWriter};
use crate::enforcement_engine::EnforcementResult;
use crate::error::TelemetryError;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for telemetry recording
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Enable telemetry recording
    pub enabled: bool,

    /// Directory for hitlog files
    pub hitlog_dir: String,

    /// Sample rate (0.0 - 1.0). 1.0 = record all
    pub sample_rate: f64,

    /// Rotate the current hitlog once it reaches this size (bytes)
    pub rotate_bytes: u64,

    /// Gzip rotated hitlogs
    pub compress_rotated: bool,

    /// Rotated hitlogs to keep
    pub max_rotated_files: usize,

    /// Flush after every session
    pub immediate_flush: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            enabled: false,
            hitlog_dir: "./var/hitlogs".to_string(),
            sample_rate: 1.0,
            rotate_bytes: 100 * 1024 * 1024, // 100 MB
            compress_rotated: true,
            max_rotated_files: 10,
            immediate_flush: false,
        }
    }
}

/// Thread-safe telemetry recorder
pub struct TelemetryRecorder {
    config: TelemetryConfig,
    writer: HitlogWriter,
    total_sessions: AtomicU64,
    deferred_sessions: AtomicU64,
    resolved_sessions: AtomicU64,
    sampled_out: AtomicU64,
}

impl TelemetryRecorder {
    /// Create a new telemetry recorder
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let writer = HitlogWriter::new(HitlogConfig::from_telemetry_config(&config))?;

        Ok(TelemetryRecorder {
            config,
            writer,
            total_sessions: AtomicU64::new(0),
            deferred_sessions: AtomicU64::new(0),
            resolved_sessions: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
        })
    }

    /// Record one enforcement result, subject to sampling.
    ///
    /// Returns whether the result was written.
    pub fn record(&self, result: &EnforcementResult) -> Result<bool, TelemetryError> {
        if !self.config.enabled {
            return Ok(false);
        }

        if self.config.sample_rate < 1.0 {
            let mut rng = rand::thread_rng();
            if rng.gen::<f64>() >= self.config.sample_rate {
                self.sampled_out.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }

        let session = EnforcementSession::from_result(result);
        self.writer.write_session(&session)?;

        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        if result.decision.is_resolved() {
            self.resolved_sessions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deferred_sessions.fetch_add(1, Ordering::Relaxed);
        }

        Ok(true)
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), TelemetryError> {
        self.writer.flush()
    }

    /// Get telemetry statistics
    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            deferred_sessions: self.deferred_sessions.load(Ordering::Relaxed),
            resolved_sessions: self.resolved_sessions.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            sample_rate: self.config.sample_rate,
        }
    }

    /// Check if telemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn writer(&self) -> &HitlogWriter {
        &self.writer
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Telemetry statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryStats {
    pub total_sessions: u64,
    pub deferred_sessions: u64,
    pub resolved_sessions: u64,
    pub sampled_out: u64,
    pub sample_rate: f64,
}

impl TelemetryStats {
    pub fn defer_rate(&self) -> f64 {
        if self.total_sessions == 0 {
            0.0
        } else {
            self.deferred_sessions as f64 / self.total_sessions as f64
        }
    }
}
