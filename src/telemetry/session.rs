//! # Enforcement Session
//!
//! One audit record per sampled enforcement call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enforcement_engine::{EnforcementResult, RuleEvidence};
use crate::types::{now_ms, Decision};

/// Unique identifier for an enforcement session
pub type SessionId = String;

/// Complete record of an intent evaluation, written as one hitlog line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementSession {
    /// Unique session ID (UUID v4)
    pub session_id: SessionId,

    /// When the session was recorded (Unix milliseconds)
    pub timestamp_ms: u64,

    pub decision: Decision,
    pub matched_rule: Option<String>,
    pub matched_boundary: Option<String>,
    pub rules_evaluated: usize,

    /// Per-rule evidence in evaluation order
    pub evidence: Vec<RuleEvidence>,

    /// Total duration in microseconds
    pub duration_us: u64,
}

impl EnforcementSession {
    pub fn from_result(result: &EnforcementResult) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            decision: result.decision,
            matched_rule: result.matched_rule.clone(),
            matched_boundary: result.matched_boundary.clone(),
            rules_evaluated: result.rules_evaluated,
            evidence: result.evidence.clone(),
            duration_us: result.duration_us,
        }
    }
}
