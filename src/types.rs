//! # Bridge Types Module
//!
//! Core type definitions shared by the store and the decision engine:
//! - Enforcement decisions
//! - Semantic slices
//! - Rule bindings supplied by the policy boundary

use std::fmt;

use serde::{Deserialize, Serialize};

// ================================================================================================
// DECISIONS
// ================================================================================================

/// Outcome of an enforcement call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Allow the tool call
    Allow,
    /// Deny/block the tool call
    Deny,
    /// Allow after rewriting the call
    Modify,
    /// Require additional authentication or human approval
    StepUp,
    /// No rule matched; fail-closed default
    Defer,
}

impl Decision {
    /// True for every decision other than the fail-closed default.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Decision::Defer)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
            Decision::Modify => write!(f, "MODIFY"),
            Decision::StepUp => write!(f, "STEP_UP"),
            Decision::Defer => write!(f, "DEFER"),
        }
    }
}

// ================================================================================================
// SLICES
// ================================================================================================

/// The four comparison dimensions of an intent or rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    /// The operation being performed (op)
    Action,
    /// The resource being touched (target)
    Resource,
    /// The payload being moved (data)
    Data,
    /// Risk and environment (context)
    Risk,
}

impl Slice {
    pub const ALL: [Slice; 4] = [Slice::Action, Slice::Resource, Slice::Data, Slice::Risk];

    pub fn index(&self) -> usize {
        match self {
            Slice::Action => 0,
            Slice::Resource => 1,
            Slice::Data => 2,
            Slice::Risk => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Slice::Action => "action",
            Slice::Resource => "resource",
            Slice::Data => "data",
            Slice::Risk => "risk",
        }
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ================================================================================================
// RULE BINDINGS
// ================================================================================================

/// A rule that applies to the current call, as resolved by the policy boundary.
///
/// The boundary owns priority and the decision a rule enforces; the store only
/// owns the rule's vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleBinding {
    /// Boundary (policy scope) the rule belongs to
    pub boundary_id: String,
    /// Rule whose vector is compared against the intent
    pub rule_id: String,
    /// Decision returned when this rule wins
    pub decision: Decision,
    /// Higher values win when several rules match
    #[serde(default)]
    pub priority: u32,
}

impl RuleBinding {
    pub fn new(
        boundary_id: impl Into<String>,
        rule_id: impl Into<String>,
        decision: Decision,
        priority: u32,
    ) -> Self {
        Self {
            boundary_id: boundary_id.into(),
            rule_id: rule_id.into(),
            decision,
            priority,
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
