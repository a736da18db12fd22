//! The ADM (Automated Decision Making) scoring engine (§4.3): composite
//! importance scoring for memories, reused for inferred graph relationships.

mod cache;
mod scorer;
mod subscores;
mod weights;

pub use scorer::{AdmScore, AdmScorer, GLOBAL_CONTEXT_KEY};
pub use subscores::{score_data_intelligence, score_data_quality, score_data_relevance};
pub use weights::{AdmThresholds, AdmWeights};
