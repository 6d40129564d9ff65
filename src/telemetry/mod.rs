//! # Telemetry Module - audit trail for enforcement decisions
//!
//! Records sampled enforcement results with:
//! - Final decision and winning rule
//! - Per-rule evidence (similarities, thresholds, status)
//! - Duration
//!
//! Each record is one JSON line in the hitlog.

pub mod recorder;
pub mod session;
pub mod writer;

pub use recorder::{TelemetryConfig, TelemetryRecorder, TelemetryStats};
pub use session::{EnforcementSession, SessionId};
pub use writer::{current_sessions, read_sessions, HitlogConfig, HitlogStats, HitlogWriter};
