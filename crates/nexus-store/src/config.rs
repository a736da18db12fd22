//! `UnifiedVectorStoreConfig`: the recognized options from §4.2, loaded from
//! the environment at the composition root.

use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    PrimaryOnly,
    PrimaryThenFallback,
    FanOutMerge,
}

impl FromStr for ReadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary_only" => Ok(ReadStrategy::PrimaryOnly),
            "primary_then_fallback" => Ok(ReadStrategy::PrimaryThenFallback),
            "fan_out_merge" => Ok(ReadStrategy::FanOutMerge),
            other => Err(format!("unrecognized read_strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnifiedVectorStoreConfig {
    pub primary_provider: String,
    pub mirror_on_write: bool,
    pub read_strategy: ReadStrategy,
    pub query_multiplier: u32,
    pub embedding_dim: usize,
    /// Consecutive failures before a provider's health flips to `Down`.
    pub failure_threshold: u32,
}

impl Default for UnifiedVectorStoreConfig {
    fn default() -> Self {
        Self {
            primary_provider: "pgvector".to_string(),
            mirror_on_write: true,
            read_strategy: ReadStrategy::PrimaryThenFallback,
            query_multiplier: 2,
            embedding_dim: nexus_types::EMBEDDING_DIM,
            failure_threshold: 3,
        }
    }
}

impl UnifiedVectorStoreConfig {
    /// Reads `CORE_NEXUS_PRIMARY_PROVIDER`, `CORE_NEXUS_MIRROR_ON_WRITE`,
    /// `CORE_NEXUS_READ_STRATEGY`, `CORE_NEXUS_QUERY_MULTIPLIER`,
    /// `CORE_NEXUS_EMBEDDING_DIM`, `CORE_NEXUS_FAILURE_THRESHOLD`; any
    /// unset or unparsable variable falls back to the documented default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            primary_provider: env::var("CORE_NEXUS_PRIMARY_PROVIDER").unwrap_or(defaults.primary_provider),
            mirror_on_write: env::var("CORE_NEXUS_MIRROR_ON_WRITE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mirror_on_write),
            read_strategy: env::var("CORE_NEXUS_READ_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.read_strategy),
            query_multiplier: env::var("CORE_NEXUS_QUERY_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.query_multiplier),
            embedding_dim: env::var("CORE_NEXUS_EMBEDDING_DIM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.embedding_dim),
            failure_threshold: env::var("CORE_NEXUS_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_threshold),
        }
    }
}
