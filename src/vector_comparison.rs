//! Direct vector comparison using cosine similarity.
//!
//! Compares an intent's four slice anchors against a rule's four slice anchors
//! and applies per-slice thresholds. A rule matches only when every slice
//! meets its threshold.

use crate::rule_vector::{RuleVector, SliceAnchors, SLICE_COUNT};
use crate::types::Slice;

/// Per-slice similarities and the match verdict for one rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonResult {
    pub matched: bool,
    pub slice_similarities: [f32; SLICE_COUNT], // action, resource, data, risk
}

/// Compute cosine similarity between two vectors.
///
/// Zero-norm and non-finite inputs score 0.0 so they can never satisfy a
/// positive threshold.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if !(norm_a >= 1e-8 && norm_b >= 1e-8) {
        return 0.0;
    }

    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// AND across slices: one under-threshold slice disqualifies the rule.
#[inline]
pub fn slices_match(similarities: &[f32; SLICE_COUNT], thresholds: &[f32; SLICE_COUNT]) -> bool {
    similarities
        .iter()
        .zip(thresholds.iter())
        .all(|(sim, thresh)| sim >= thresh)
}

/// Similarity of each intent slice against the matching rule slice.
pub fn slice_similarities(intent: &SliceAnchors, rule: &SliceAnchors) -> [f32; SLICE_COUNT] {
    let mut similarities = [0.0f32; SLICE_COUNT];
    for slice in Slice::ALL {
        similarities[slice.index()] = cosine_similarity(intent.get(slice), rule.get(slice));
    }
    similarities
}

/// Compare intent anchors against a rule's anchors and thresholds.
pub fn compare_intent_vs_rule(intent: &SliceAnchors, rule_vector: &RuleVector) -> ComparisonResult {
    let slice_similarities = slice_similarities(intent, &rule_vector.anchors);

    ComparisonResult {
        matched: slices_match(&slice_similarities, &rule_vector.thresholds),
        slice_similarities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_vector::ANCHOR_DIM;

    fn uniform(value: f32) -> SliceAnchors {
        SliceAnchors {
            action: [value; ANCHOR_DIM],
            resource: [value; ANCHOR_DIM],
            data: [value; ANCHOR_DIM],
            risk: [value; ANCHOR_DIM],
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = [0.5f32; 32];
        let b = [0.5f32; 32];
        let result = cosine_similarity(&a, &b);
        assert!((result - 1.0).abs() < 0.01, "Expected ~1.0, got {}", result);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let mut a = [0.0f32; 32];
        let mut b = [0.0f32; 32];
        a[0..16].fill(1.0);
        b[16..32].fill(1.0);
        let result = cosine_similarity(&a, &b);
        assert!(result.abs() < 0.05, "Expected ~0, got {}", result);
    }

    #[test]
    fn test_zero_norm_guard() {
        let a = [0.0f32; 32];
        let b = [1.0f32; 32];
        let result = cosine_similarity(&a, &b);
        assert_eq!(result, 0.0);
        assert!(!result.is_nan());
    }

    #[test]
    fn test_nan_input_scores_zero() {
        let mut a = [1.0f32; 32];
        a[7] = f32::NAN;
        let b = [1.0f32; 32];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_slices_match_and_semantics() {
        let thresholds = [0.8, 0.8, 0.8, 0.8];
        assert!(slices_match(&[0.9, 0.95, 0.8, 0.99], &thresholds));
        assert!(!slices_match(&[0.9, 0.95, 0.79, 0.99], &thresholds));
    }

    #[test]
    fn test_compare_all_slices_pass() {
        let rule = RuleVector::new("r", uniform(1.0), [0.85, 0.85, 0.85, 0.85]);
        let result = compare_intent_vs_rule(&uniform(0.9), &rule);
        assert!(result.matched, "All slices should pass");
        for sim in result.slice_similarities {
            assert!((sim - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_compare_one_slice_fails() {
        let mut intent = uniform(1.0);
        intent.action = [-1.0; ANCHOR_DIM]; // Action slice opposite direction

        let rule = RuleVector::new("r", uniform(1.0), [0.85, 0.85, 0.85, 0.85]);
        let result = compare_intent_vs_rule(&intent, &rule);
        assert!(!result.matched, "Should not match when one slice fails");
        assert!(result.slice_similarities[0] < -0.99);
        assert!(result.slice_similarities[1] > 0.99);
    }

    #[test]
    fn test_zero_thresholds_still_reject_negative_similarity() {
        let mut intent = uniform(1.0);
        intent.data = [-1.0; ANCHOR_DIM];
        let rule = RuleVector::new("r", uniform(1.0), [0.0; 4]);
        assert!(!compare_intent_vs_rule(&intent, &rule).matched);
    }
}
