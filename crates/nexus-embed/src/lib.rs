//! `Embedder` implementations and the pluggable entity/relation extractors.

#[cfg(feature = "test-util")]
pub mod mock;
mod openai;

mod entity_extractor;
mod llm_extractor;
mod regex_extractor;

pub use nexus_types::{Embedder, EmbedderError, EntityExtractor, ExtractorError, ExtractionResult};
pub use openai::OpenAiEmbedder;

#[cfg(feature = "test-util")]
pub use mock::MockEmbedder;

pub use entity_extractor::{CachedExtractor, CompositeExtractor};
pub use llm_extractor::{LlmEntityExtractor, LlmExtractorConfig};
pub use regex_extractor::RegexEntityExtractor;
