//! `UnifiedVectorStore`: hides provider plurality behind one contract,
//! provides ordered failover, and special-cases the empty-query "get
//! recent" path (§4.2).

use crate::config::{ReadStrategy, UnifiedVectorStoreConfig};
use crate::health::HealthTracker;
use nexus_scheduler::BackgroundSupervisor;
use nexus_types::{CoreError, Memory, ProviderHealth, QueryFilters, ScoredMemory, VectorProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pseudo-embedding used for the empty-query recency path when the
/// primary provider can't serve `get_recent` natively. Cosine similarity
/// against an all-zero vector is undefined and would silently return no
/// rows, so every component is a small positive constant instead.
pub const RECENCY_PSEUDO_EMBEDDING_VALUE: f32 = 1e-3;

struct ProviderEntry {
    provider: Arc<dyn VectorProvider>,
    is_primary: bool,
    health: Arc<HealthTracker>,
}

pub struct ProviderInventoryItem {
    pub name: String,
    pub is_primary: bool,
    pub health: ProviderHealth,
}

pub struct QueryOutcome {
    pub results: Vec<ScoredMemory>,
    pub served_by: String,
}

pub struct UnifiedVectorStore {
    entries: Vec<ProviderEntry>,
    primary_idx: usize,
    config: UnifiedVectorStoreConfig,
    supervisor: Arc<BackgroundSupervisor>,
}

impl UnifiedVectorStore {
    /// `providers` must be non-empty and contain `config.primary_provider`
    /// by name exactly once; order is preserved as the failover order.
    pub fn new(providers: Vec<Arc<dyn VectorProvider>>, config: UnifiedVectorStoreConfig, supervisor: Arc<BackgroundSupervisor>) -> Result<Self, CoreError> {
        if providers.is_empty() {
            return Err(CoreError::InvalidInput("UnifiedVectorStore requires at least one provider".to_string()));
        }
        let primary_idx = providers
            .iter()
            .position(|p| p.name() == config.primary_provider)
            .ok_or_else(|| CoreError::InvalidInput(format!("primary provider '{}' not among enabled providers", config.primary_provider)))?;
        let entries = providers
            .into_iter()
            .enumerate()
            .map(|(i, provider)| ProviderEntry {
                is_primary: i == primary_idx,
                health: HealthTracker::new(config.failure_threshold),
                provider,
            })
            .collect();
        Ok(Self {
            entries,
            primary_idx,
            config,
            supervisor,
        })
    }

    fn primary(&self) -> &ProviderEntry {
        &self.entries[self.primary_idx]
    }

    fn mirrors(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter().enumerate().filter(move |(i, _)| *i != self.primary_idx).map(|(_, e)| e)
    }

    /// Write path. `memory` arrives fully formed (id generated, embedding
    /// and ADM score already set by the facade) — the store's job is
    /// durability and fan-out, not content production. Primary failure is
    /// fail-loud; mirror failure is fail-soft (§9).
    pub async fn add(&self, memory: Memory) -> Result<Memory, CoreError> {
        if memory.embedding.len() != self.config.embedding_dim {
            return Err(CoreError::InvalidInput(format!(
                "embedding dim {} != configured {}",
                memory.embedding.len(),
                self.config.embedding_dim
            )));
        }
        let primary = self.primary();
        let start = Instant::now();
        match primary.provider.store(&memory).await {
            Ok(()) => {
                primary.health.record_success(start.elapsed().as_secs_f64() * 1000.0, None).await;
            }
            Err(e) => {
                primary.health.record_failure().await;
                return Err(CoreError::StoreFailed(format!("primary '{}' store failed: {e}", primary.provider.name())));
            }
        }

        if self.config.mirror_on_write {
            for entry in self.mirrors() {
                let provider = Arc::clone(&entry.provider);
                let health = Arc::clone(&entry.health);
                let mem = memory.clone();
                let kind = format!("mirror_store:{}", provider.name());
                self.supervisor
                    .submit_default(&kind, async move {
                        let start = Instant::now();
                        match provider.store(&mem).await {
                            Ok(()) => {
                                health.record_success(start.elapsed().as_secs_f64() * 1000.0, None).await;
                                Ok(())
                            }
                            Err(e) => {
                                health.record_failure().await;
                                Err(e)
                            }
                        }
                    })
                    .await;
            }
        }
        Ok(memory)
    }

    /// Read path for non-empty query text. Caller supplies the already-
    /// embedded query vector; the store owns failover and oversample/
    /// truncate, not embedding.
    pub async fn query(&self, query_embedding: &[f32], k: usize, filters: &QueryFilters, min_similarity: f32) -> Result<QueryOutcome, CoreError> {
        let oversample = (k as u32).saturating_mul(self.config.query_multiplier).max(k as u32) as usize;
        let outcome = match self.config.read_strategy {
            ReadStrategy::FanOutMerge => self.query_fan_out(query_embedding, oversample, filters).await?,
            ReadStrategy::PrimaryOnly => self.query_one(self.primary_idx, query_embedding, oversample, filters).await?,
            ReadStrategy::PrimaryThenFallback => self.query_with_failover(query_embedding, oversample, filters).await?,
        };
        Ok(self.post_filter(outcome, k, min_similarity))
    }

    /// Empty-query "get recent" path (§4.2). Uses `get_recent` natively
    /// when the primary advertises it; otherwise falls back to `query`
    /// with the non-zero pseudo-embedding.
    pub async fn get_recent(&self, k: usize, filters: &QueryFilters) -> Result<QueryOutcome, CoreError> {
        let oversample = (k as u32).saturating_mul(self.config.query_multiplier).max(k as u32) as usize;
        if self.primary().provider.supports_get_recent() {
            match self.try_get_recent(self.primary_idx, oversample, filters).await {
                Ok(outcome) => return Ok(self.truncate_only(outcome, k)),
                Err(CoreError::BackendUnavailable(_)) if self.config.read_strategy != ReadStrategy::PrimaryOnly => {
                    if let Some((idx, outcome)) = self.failover_get_recent(oversample, filters).await {
                        return Ok(self.truncate_only(outcome.with_served_by(self.entries[idx].provider.name()), k));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        let pseudo = vec![RECENCY_PSEUDO_EMBEDDING_VALUE; self.config.embedding_dim];
        let mut outcome = self.query_with_failover(&pseudo, oversample, filters).await?;
        outcome.results.sort_by(|a, b| b.memory.created_at.cmp(&a.memory.created_at));
        Ok(self.truncate_only(outcome, k))
    }

    async fn try_get_recent(&self, idx: usize, k: usize, filters: &QueryFilters) -> Result<QueryOutcome, CoreError> {
        let entry = &self.entries[idx];
        let start = Instant::now();
        match entry.provider.get_recent(k, filters).await {
            Ok(results) => {
                entry.health.record_success(start.elapsed().as_secs_f64() * 1000.0, None).await;
                Ok(QueryOutcome {
                    results,
                    served_by: entry.provider.name().to_string(),
                })
            }
            Err(e) => {
                entry.health.record_failure().await;
                Err(e)
            }
        }
    }

    async fn failover_get_recent(&self, k: usize, filters: &QueryFilters) -> Option<(usize, QueryOutcome)> {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx == self.primary_idx || entry.health.is_down().await {
                continue;
            }
            if !entry.provider.supports_get_recent() {
                continue;
            }
            if let Ok(outcome) = self.try_get_recent(idx, k, filters).await {
                return Some((idx, outcome));
            }
        }
        None
    }

    async fn query_one(&self, idx: usize, query_embedding: &[f32], k: usize, filters: &QueryFilters) -> Result<QueryOutcome, CoreError> {
        let entry = &self.entries[idx];
        let start = Instant::now();
        match entry.provider.query(query_embedding, k, filters).await {
            Ok(results) => {
                entry.health.record_success(start.elapsed().as_secs_f64() * 1000.0, None).await;
                Ok(QueryOutcome {
                    results,
                    served_by: entry.provider.name().to_string(),
                })
            }
            Err(e) => {
                entry.health.record_failure().await;
                Err(e)
            }
        }
    }

    /// Walk the failover list in order starting at primary, skipping
    /// providers already marked `Down`, until one succeeds.
    async fn query_with_failover(&self, query_embedding: &[f32], k: usize, filters: &QueryFilters) -> Result<QueryOutcome, CoreError> {
        match self.query_one(self.primary_idx, query_embedding, k, filters).await {
            Ok(outcome) => return Ok(outcome),
            Err(CoreError::BackendUnavailable(_)) => {}
            Err(e) => return Err(e),
        }
        if self.config.read_strategy == ReadStrategy::PrimaryOnly {
            return Err(CoreError::BackendUnavailable("primary unavailable and failover disabled".to_string()));
        }
        let mut last_err = CoreError::BackendUnavailable("no providers available".to_string());
        for idx in 0..self.entries.len() {
            if idx == self.primary_idx {
                continue;
            }
            if self.entries[idx].health.is_down().await {
                continue;
            }
            match self.query_one(idx, query_embedding, k, filters).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn query_fan_out(&self, query_embedding: &[f32], k: usize, filters: &QueryFilters) -> Result<QueryOutcome, CoreError> {
        let mut merged: HashMap<String, ScoredMemory> = HashMap::new();
        let mut any_ok = false;
        let mut last_err = CoreError::BackendUnavailable("no providers available".to_string());
        for idx in 0..self.entries.len() {
            match self.query_one(idx, query_embedding, k, filters).await {
                Ok(outcome) => {
                    any_ok = true;
                    for hit in outcome.results {
                        merged
                            .entry(hit.memory.id.clone())
                            .and_modify(|existing| {
                                if hit.similarity > existing.similarity {
                                    *existing = hit.clone();
                                }
                            })
                            .or_insert(hit);
                    }
                }
                Err(e) => last_err = e,
            }
        }
        if !any_ok {
            return Err(last_err);
        }
        let mut results: Vec<ScoredMemory> = merged.into_values().collect();
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(QueryOutcome {
            results,
            served_by: "fan_out_merge".to_string(),
        })
    }

    fn post_filter(&self, mut outcome: QueryOutcome, k: usize, min_similarity: f32) -> QueryOutcome {
        outcome.results.retain(|h| h.similarity >= min_similarity);
        outcome.results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        outcome.results.truncate(k);
        outcome
    }

    fn truncate_only(&self, mut outcome: QueryOutcome, k: usize) -> QueryOutcome {
        outcome.results.truncate(k);
        outcome
    }

    /// Best-effort mirror propagation for deletes, same supervisor path as
    /// writes (§9 open-question resolution: mirror-best-effort).
    pub async fn delete(&self, memory_id: &str) -> Result<(), CoreError> {
        let primary = self.primary();
        match primary.provider.delete(memory_id).await {
            Ok(()) => primary.health.record_success(0.0, None).await,
            Err(e @ CoreError::NotFound(_)) => return Err(e),
            Err(e) => {
                primary.health.record_failure().await;
                return Err(e);
            }
        }
        for entry in self.mirrors() {
            let provider = Arc::clone(&entry.provider);
            let health = Arc::clone(&entry.health);
            let id = memory_id.to_string();
            let kind = format!("mirror_delete:{}", provider.name());
            self.supervisor
                .submit_default(&kind, async move {
                    match provider.delete(&id).await {
                        Ok(()) | Err(CoreError::NotFound(_)) => {
                            health.record_success(0.0, None).await;
                            Ok(())
                        }
                        Err(e) => {
                            health.record_failure().await;
                            Err(e)
                        }
                    }
                })
                .await;
        }
        Ok(())
    }

    /// Direct lookup by id (§6 `GET /memories/{id}`). Tries the primary
    /// first and fails over to healthy mirrors on `BackendUnavailable`,
    /// same as `query`; a clean "not found" from the primary is returned
    /// as-is rather than treated as a failover trigger.
    pub async fn get(&self, memory_id: &str) -> Result<Option<Memory>, CoreError> {
        match self.get_one(self.primary_idx, memory_id).await {
            Ok(found) => return Ok(found),
            Err(CoreError::BackendUnavailable(_)) => {}
            Err(e) => return Err(e),
        }
        if self.config.read_strategy == ReadStrategy::PrimaryOnly {
            return Err(CoreError::BackendUnavailable("primary unavailable and failover disabled".to_string()));
        }
        let mut last_err = CoreError::BackendUnavailable("no providers available".to_string());
        for idx in 0..self.entries.len() {
            if idx == self.primary_idx || self.entries[idx].health.is_down().await {
                continue;
            }
            match self.get_one(idx, memory_id).await {
                Ok(found) => return Ok(found),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn get_one(&self, idx: usize, memory_id: &str) -> Result<Option<Memory>, CoreError> {
        let entry = &self.entries[idx];
        let start = Instant::now();
        match entry.provider.get(memory_id).await {
            Ok(found) => {
                entry.health.record_success(start.elapsed().as_secs_f64() * 1000.0, None).await;
                Ok(found)
            }
            Err(e) => {
                entry.health.record_failure().await;
                Err(e)
            }
        }
    }

    pub fn primary_name(&self) -> &str {
        self.primary().provider.name()
    }

    pub async fn provider_inventory(&self) -> Vec<ProviderInventoryItem> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            out.push(ProviderInventoryItem {
                name: entry.provider.name().to_string(),
                is_primary: entry.is_primary,
                health: entry.health.snapshot().await,
            });
        }
        out
    }

    /// Runs periodic `health_check()` probes against every provider until
    /// `self` is dropped. Spawned once at startup; independent schedulable
    /// unit per §5.
    pub fn spawn_health_probe_loop(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for entry in &self.entries {
                    let probe = entry.provider.health_check().await;
                    entry.health.apply_probe(probe).await;
                }
            }
        });
    }
}

trait WithServedBy {
    fn with_served_by(self, name: &str) -> Self;
}

impl WithServedBy for QueryOutcome {
    fn with_served_by(mut self, name: &str) -> Self {
        self.served_by = name.to_string();
        self
    }
}
