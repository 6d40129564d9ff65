//! # Enforcement Engine
//!
//! Evaluates one intent against the rules the policy boundary says apply:
//! 1. Deduplicates and canonically orders the bindings
//! 2. Resolves each rule's vector through the tier coordinator
//! 3. Compares every slice (cosine similarity, AND across slices)
//! 4. Picks the winning match, or DEFER when nothing matches
//! 5. Hands the result to the audit recorder, if one is attached
//!
//! Evaluation never short-circuits: every binding produces evidence, so the
//! evidence list depends only on the set of bindings, never on their order.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::rule_vector::{IntentVector, SLICE_COUNT};
use crate::storage::TierCoordinator;
use crate::telemetry::TelemetryRecorder;
use crate::types::{Decision, RuleBinding};
use crate::vector_comparison::compare_intent_vs_rule;

// ============================================================================
// Data Structures
// ============================================================================

/// How a binding's rule was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    /// Vector found and compared
    Evaluated,
    /// No tier holds the rule
    Missing,
    /// A tier failed to read or decode the rule
    Unreadable,
}

/// Evidence from a single rule evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvidence {
    pub boundary_id: String,
    pub rule_id: String,
    /// Decision the rule enforces when it wins
    pub decision: Decision,
    pub priority: u32,
    /// Per-slice similarity scores [action, resource, data, risk]
    pub similarities: [f32; SLICE_COUNT],
    /// Per-slice thresholds [action, resource, data, risk]
    pub thresholds: [f32; SLICE_COUNT],
    pub matched: bool,
    pub status: EvidenceStatus,
}

impl RuleEvidence {
    fn unevaluated(binding: &RuleBinding, status: EvidenceStatus) -> Self {
        Self {
            boundary_id: binding.boundary_id.clone(),
            rule_id: binding.rule_id.clone(),
            decision: binding.decision,
            priority: binding.priority,
            similarities: [0.0; SLICE_COUNT],
            thresholds: [0.0; SLICE_COUNT],
            matched: false,
            status,
        }
    }

    fn specificity(&self) -> f32 {
        self.thresholds.iter().sum()
    }
}

/// Result of enforcement evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub decision: Decision,
    /// Rule that produced the decision; `None` when deferred
    pub matched_rule: Option<String>,
    /// Boundary of the winning rule
    pub matched_boundary: Option<String>,
    /// Evidence for every evaluated binding, in canonical order
    pub evidence: Vec<RuleEvidence>,
    pub rules_evaluated: usize,
    pub duration_us: u64,
}

/// Decision engine over a shared tier coordinator.
pub struct EnforcementEngine {
    tiers: Arc<TierCoordinator>,
    /// Telemetry recorder (optional - can be disabled)
    telemetry: Option<Arc<TelemetryRecorder>>,
}

// ============================================================================
// EnforcementEngine Implementation
// ============================================================================

impl EnforcementEngine {
    pub fn new(tiers: Arc<TierCoordinator>) -> Self {
        Self::with_telemetry(tiers, None)
    }

    /// Create enforcement engine with an optional audit recorder
    pub fn with_telemetry(
        tiers: Arc<TierCoordinator>,
        telemetry: Option<Arc<TelemetryRecorder>>,
    ) -> Self {
        Self { tiers, telemetry }
    }

    pub fn telemetry(&self) -> Option<&Arc<TelemetryRecorder>> {
        self.telemetry.as_ref()
    }

    /// Evaluate `intent` against `bindings` and return the decision with evidence.
    ///
    /// Fail-closed: missing or unreadable rules never match, and no match
    /// resolves to [`Decision::Defer`].
    pub fn enforce(&self, intent: &IntentVector, bindings: &[RuleBinding]) -> EnforcementResult {
        let started = Instant::now();

        let bindings = canonical_bindings(bindings);
        let evidence: Vec<RuleEvidence> = bindings
            .iter()
            .map(|binding| self.evaluate(intent, binding))
            .collect();

        let winner = evidence
            .iter()
            .filter(|e| e.matched)
            .min_by(|a, b| winner_order(a, b));

        let (decision, matched_rule, matched_boundary) = match winner {
            Some(w) => (w.decision, Some(w.rule_id.clone()), Some(w.boundary_id.clone())),
            None => (Decision::Defer, None, None),
        };

        let result = EnforcementResult {
            decision,
            matched_rule,
            matched_boundary,
            rules_evaluated: evidence.len(),
            evidence,
            duration_us: started.elapsed().as_micros() as u64,
        };

        debug!(
            "Enforced intent against {} rules: {} (matched: {:?})",
            result.rules_evaluated, result.decision, result.matched_rule
        );

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.record(&result) {
                warn!("Failed to record enforcement session: {}", e);
            }
        }

        result
    }

    fn evaluate(&self, intent: &IntentVector, binding: &RuleBinding) -> RuleEvidence {
        let rule_vector = match self.tiers.get(&binding.rule_id) {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                debug!("Rule '{}' not installed; skipping", binding.rule_id);
                return RuleEvidence::unevaluated(binding, EvidenceStatus::Missing);
            }
            Err(e) => {
                warn!("Rule '{}' unreadable, treating as unmatched: {}", binding.rule_id, e);
                return RuleEvidence::unevaluated(binding, EvidenceStatus::Unreadable);
            }
        };

        let comparison = compare_intent_vs_rule(&intent.anchors, &rule_vector);

        RuleEvidence {
            boundary_id: binding.boundary_id.clone(),
            rule_id: binding.rule_id.clone(),
            decision: binding.decision,
            priority: binding.priority,
            similarities: comparison.slice_similarities,
            thresholds: rule_vector.thresholds,
            matched: comparison.matched,
            status: EvidenceStatus::Evaluated,
        }
    }
}

/// Priority desc, rule id asc, boundary asc. Duplicates of (boundary, rule)
/// keep the highest-priority binding.
fn canonical_bindings(bindings: &[RuleBinding]) -> Vec<RuleBinding> {
    let mut unique = bindings.to_vec();
    unique.sort_by(|a, b| {
        a.rule_id
            .cmp(&b.rule_id)
            .then_with(|| a.boundary_id.cmp(&b.boundary_id))
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.decision.cmp(&b.decision))
    });
    unique.dedup_by(|later, earlier| {
        later.rule_id == earlier.rule_id && later.boundary_id == earlier.boundary_id
    });

    unique.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
            .then_with(|| a.boundary_id.cmp(&b.boundary_id))
    });
    unique
}

/// `Less` means `a` beats `b`.
fn winner_order(a: &RuleEvidence, b: &RuleEvidence) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.specificity().total_cmp(&a.specificity()))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
        .then_with(|| a.boundary_id.cmp(&b.boundary_id))
}
