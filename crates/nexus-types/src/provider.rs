//! The vector provider capability contract (§4.1) and health tracking.

use crate::{CoreError, Memory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A memory plus its similarity to some query, as returned by `query`/`get_recent`.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// Cosine similarity, `1 - cos_distance`, clamped to [0,1].
    pub similarity: f32,
}

/// Filters pushed down to a provider's `query`/`get_recent`. Unsupported
/// filters degrade to post-filtering by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    pub item_count: u64,
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealthState {
    Healthy,
    Degraded,
    Down,
}

/// A health record updated by periodic probes and by every live call's
/// success/failure. A provider enters `Down` after `consecutive_failures`
/// crosses the configured threshold and is skipped for read failover until
/// a probe succeeds again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub state: ProviderHealthState,
    pub last_ok: Option<String>,
    pub consecutive_failures: u32,
    pub latency_ms: Option<f64>,
    pub item_count: Option<u64>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: ProviderHealthState::Healthy,
            last_ok: None,
            consecutive_failures: 0,
            latency_ms: None,
            item_count: None,
        }
    }
}

/// The fixed capability set every vector backend implements. The
/// orchestrator (`UnifiedVectorStore`) holds an ordered `Vec<Arc<dyn
/// VectorProvider>>` and never matches on a concrete backend type.
#[async_trait]
pub trait VectorProvider: Send + Sync {
    /// Stable provider name, used in config, health reports, and `served_by`.
    fn name(&self) -> &str;

    async fn store(&self, memory: &Memory) -> Result<(), CoreError>;

    async fn query(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredMemory>, CoreError>;

    async fn delete(&self, memory_id: &str) -> Result<(), CoreError>;

    /// Direct lookup by id, bypassing similarity search. `Ok(None)` means
    /// the provider is reachable but holds no such memory.
    async fn get(&self, memory_id: &str) -> Result<Option<Memory>, CoreError>;

    async fn health_check(&self) -> ProviderHealth;

    async fn get_stats(&self) -> ProviderStats;

    /// Whether this provider can serve `get_recent` natively. When false,
    /// the orchestrator falls back to `query` with a synthetic vector.
    fn supports_get_recent(&self) -> bool {
        false
    }

    /// Latest memories by `created_at` descending. Only called when
    /// `supports_get_recent()` is true.
    async fn get_recent(
        &self,
        _k: usize,
        _filters: &QueryFilters,
    ) -> Result<Vec<ScoredMemory>, CoreError> {
        Err(CoreError::BackendUnavailable(
            "get_recent not supported by this provider".to_string(),
        ))
    }
}
