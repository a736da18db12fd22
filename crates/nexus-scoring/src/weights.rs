//! ADM weight profile: how the three sub-scores combine into one composite.

use serde::{Deserialize, Serialize};

/// `w_q + w_r + w_i` need not sum to exactly 1 on input; `score()` clamps
/// the final composite to `[0,1]` regardless, but callers should supply a
/// profile that sums to 1 so the scale stays meaningful.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmWeights {
    pub w_quality: f32,
    pub w_relevance: f32,
    pub w_intelligence: f32,
}

impl Default for AdmWeights {
    fn default() -> Self {
        Self {
            w_quality: 0.3,
            w_relevance: 0.4,
            w_intelligence: 0.3,
        }
    }
}

/// Threshold profile: below `min_quality` a memory is flagged low-quality
/// (still stored); below `min_strength` a relationship is not persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmThresholds {
    pub min_quality: f32,
    pub min_strength: f32,
}

impl Default for AdmThresholds {
    fn default() -> Self {
        Self {
            min_quality: 0.2,
            min_strength: 0.3,
        }
    }
}
