//! `AdmScorer`: composite importance scoring for memories and, reused with
//! a synthesized text, for inferred graph relationships (§4.3).

use crate::cache::RollingContextCache;
use crate::subscores::{score_data_intelligence, score_data_quality, score_data_relevance};
use crate::weights::{AdmThresholds, AdmWeights};
use serde::Serialize;

/// Scoping key used for the rolling context sample when the caller does not
/// provide an explicit context (e.g. no `user_id` on the request).
pub const GLOBAL_CONTEXT_KEY: &str = "__global__";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdmScore {
    pub dq: f32,
    pub dr: f32,
    pub di: f32,
    pub composite: f32,
}

pub struct AdmScorer {
    weights: AdmWeights,
    thresholds: AdmThresholds,
    context: RollingContextCache,
}

impl Default for AdmScorer {
    fn default() -> Self {
        Self::new(AdmWeights::default(), AdmThresholds::default())
    }
}

impl AdmScorer {
    pub fn new(weights: AdmWeights, thresholds: AdmThresholds) -> Self {
        Self {
            weights,
            thresholds,
            context: RollingContextCache::default(),
        }
    }

    pub fn thresholds(&self) -> AdmThresholds {
        self.thresholds
    }

    pub fn weights(&self) -> AdmWeights {
        self.weights
    }

    /// Record `embedding` into the rolling context sample for `key` so that
    /// later calls to `score` without an explicit context still have
    /// something to compare against. Called by the write path after a
    /// memory is scored and stored.
    pub fn observe(&self, key: &str, embedding: Vec<f32>) {
        self.context.push(key, embedding);
    }

    /// Score arbitrary content. `context` overrides the rolling sample for
    /// `context_key` when provided (e.g. a caller-supplied list of
    /// co-occurring entities' embeddings); otherwise the rolling sample is
    /// used. Pure given its inputs: reproducible to 1e-6 per §4.3.
    pub fn score(&self, content: &str, embedding: Option<&[f32]>, context_key: &str, context: Option<&[Vec<f32>]>) -> AdmScore {
        let dq = score_data_quality(content);
        let di = score_data_intelligence(content);
        let dr = match context {
            Some(ctx) => score_data_relevance(embedding, ctx),
            None => {
                let sample = self.context.sample(context_key);
                score_data_relevance(embedding, &sample)
            }
        };
        let composite = (self.weights.w_quality * dq + self.weights.w_relevance * dr + self.weights.w_intelligence * di).clamp(0.0, 1.0);
        AdmScore { dq, dr, di, composite }
    }

    /// Score a memory at ingress and record it into the rolling context for
    /// `context_key` in the same call, matching the write path's "score
    /// once, then contribute to future DR" lifecycle.
    pub fn score_and_observe(&self, content: &str, embedding: &[f32], context_key: &str) -> AdmScore {
        let score = self.score(content, Some(embedding), context_key, None);
        self.observe(context_key, embedding.to_vec());
        score
    }

    pub fn is_low_quality(&self, composite: f32) -> bool {
        composite < self.thresholds.min_quality
    }

    pub fn meets_min_strength(&self, strength: f32) -> bool {
        strength >= self.thresholds.min_strength
    }

    /// Score an inferred relationship: the graph provider supplies a
    /// distance-decay `base_strength` (`exp(-distance/W) * conf_from *
    /// conf_to`); this reuses the composite scorer over the synthesized
    /// `"{from} {connective} {to}"` text so a relationship built from
    /// low-quality or low-density mentions is discounted.
    pub fn score_relationship(&self, from_surface: &str, to_surface: &str, connective: Option<&str>, base_strength: f32, context: &[Vec<f32>]) -> f32 {
        let text = match connective {
            Some(c) if !c.is_empty() => format!("{from_surface} {c} {to_surface}"),
            _ => format!("{from_surface} {to_surface}"),
        };
        let score = self.score(&text, None, GLOBAL_CONTEXT_KEY, Some(context));
        (base_strength * score.composite).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_across_calls() {
        let scorer = AdmScorer::default();
        let content = "Alice works at Acme Corp and leads the platform team.";
        let embedding = vec![0.1, 0.2, 0.3];
        let ctx = vec![vec![0.1, 0.2, 0.31]];
        let a = scorer.score(content, Some(&embedding), "k", Some(&ctx));
        let b = scorer.score(content, Some(&embedding), "k", Some(&ctx));
        assert_eq!(a.dq, b.dq);
        assert_eq!(a.dr, b.dr);
        assert_eq!(a.di, b.di);
        assert!((a.composite - b.composite).abs() < 1e-6);
    }

    #[test]
    fn composite_is_clamped_to_unit_interval() {
        let scorer = AdmScorer::default();
        let score = scorer.score("", None, GLOBAL_CONTEXT_KEY, None);
        assert!((0.0..=1.0).contains(&score.composite));
    }

    #[test]
    fn observe_then_score_uses_rolling_sample() {
        let scorer = AdmScorer::default();
        scorer.observe("u1", vec![1.0, 0.0]);
        let score = scorer.score("some content", Some(&[1.0, 0.0]), "u1", None);
        assert!(score.dr > 0.9);
    }

    #[test]
    fn low_quality_threshold() {
        let scorer = AdmScorer::default();
        assert!(scorer.is_low_quality(0.1));
        assert!(!scorer.is_low_quality(0.5));
    }

    #[test]
    fn relationship_strength_is_scaled_by_composite_not_passed_through_unchanged() {
        let scorer = AdmScorer::default();
        let strength = scorer.score_relationship("Alice", "Acme", Some("works for"), 0.9, &[]);
        assert!(strength > 0.0 && strength <= 0.9);
    }
}
