//! `MemoryService`: orchestrates one logical operation across the three
//! core components (§4.5). Every entry point owns a request-level
//! deadline and a correlation id, and draws the fail-loud/fail-soft line
//! from §9: the primary write is on the critical path, mirrors and graph
//! ingest are fire-and-forget via the supervisor.

use chrono::Utc;
use nexus_graph::{BulkMemoryInput, GraphProvider, IngestSummary};
use nexus_scheduler::BackgroundSupervisor;
use nexus_scoring::AdmScorer;
use nexus_store::UnifiedVectorStore;
use nexus_types::{AuditEvent, AuditEventKind, AuditStore, CoreError, Embedder, Memory, QueryFilters, ScoredMemory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Content length cap enforced before any embedding/scoring work starts;
/// requests over this surface as `InvalidInput` with a message the HTTP
/// layer recognizes and maps to 413 (§6).
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

pub struct CreateMemoryInput {
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

pub enum BatchItemOutcome {
    Ok(Memory),
    Err(CoreError),
}

pub struct QueryResult {
    pub results: Vec<ScoredMemory>,
    pub served_by: String,
}

/// Admission guard: rejects before any backend I/O when the in-flight
/// write count is already at the high-water mark (§5 "Backpressure").
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryService {
    store: Arc<UnifiedVectorStore>,
    scorer: Arc<AdmScorer>,
    embedder: Arc<dyn Embedder>,
    graph: Arc<GraphProvider>,
    supervisor: Arc<BackgroundSupervisor>,
    audit: Arc<dyn AuditStore>,
    config: crate::ServiceConfig,
    in_flight_writes: AtomicUsize,
}

impl MemoryService {
    pub fn new(
        store: Arc<UnifiedVectorStore>,
        scorer: Arc<AdmScorer>,
        embedder: Arc<dyn Embedder>,
        graph: Arc<GraphProvider>,
        supervisor: Arc<BackgroundSupervisor>,
        audit: Arc<dyn AuditStore>,
        config: crate::ServiceConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            embedder,
            graph,
            supervisor,
            audit,
            config,
            in_flight_writes: AtomicUsize::new(0),
        }
    }

    fn context_key(user_id: &Option<String>) -> &str {
        user_id.as_deref().unwrap_or(nexus_scoring::GLOBAL_CONTEXT_KEY)
    }

    fn validate_content(content: &str) -> Result<(), CoreError> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidInput("content must not be empty".to_string()));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(CoreError::InvalidInput(format!(
                "content too large: {} bytes exceeds the {} byte limit",
                content.len(),
                MAX_CONTENT_BYTES
            )));
        }
        Ok(())
    }

    fn admit_write(&self) -> Result<InFlightGuard<'_>, CoreError> {
        let prev = self.in_flight_writes.fetch_add(1, Ordering::SeqCst);
        if prev >= self.config.max_in_flight_writes {
            self.in_flight_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(CoreError::Overloaded(format!(
                "{} writes already in flight",
                self.config.max_in_flight_writes
            )));
        }
        Ok(InFlightGuard(&self.in_flight_writes))
    }

    async fn audit(&self, kind: AuditEventKind, memory_id: Option<String>, user_id: Option<String>, correlation_id: &str, outcome: &str) {
        let event = AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            kind,
            memory_id,
            user_id,
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            outcome: Some(outcome.to_string()),
        };
        if let Err(e) = self.audit.append(event).await {
            tracing::warn!(error = %e, "audit append failed");
        }
    }

    fn spawn_graph_ingest(&self, memory_id: String, content: String, metadata: HashMap<String, serde_json::Value>) {
        let graph = Arc::clone(&self.graph);
        self.supervisor_submit_sync("graph_ingest", async move { graph.ingest(&memory_id, &content, &metadata).await.map(|_| ()) });
    }

    /// `supervisor.submit_default` is async (it touches the counters map),
    /// but callers here are sync facade methods returning a `Memory`
    /// immediately; we spawn the submission itself so graph ingest never
    /// delays the response (the submission future resolves near-instantly
    /// in practice, but correctness shouldn't depend on that).
    fn supervisor_submit_sync<F>(&self, kind: &'static str, fut: F)
    where
        F: std::future::Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            supervisor.submit_default(kind, fut).await;
        });
    }

    fn touch_in_background(&self, memory: Memory) {
        let store = Arc::clone(&self.store);
        self.supervisor_submit_sync("touch_memory", async move {
            let mut touched = memory;
            touched.touch();
            store.add(touched).await.map(|_| ())
        });
    }

    /// `create_memory` (§4.5): embed, score, `store.add`, fire-and-forget
    /// graph ingest. Primary write is fail-loud; everything after it is
    /// fail-soft.
    pub async fn create_memory(&self, input: CreateMemoryInput, correlation_id: &str) -> Result<Memory, CoreError> {
        Self::validate_content(&input.content)?;
        let _guard = self.admit_write()?;

        let result = tokio::time::timeout(self.config.write_timeout, self.create_memory_inner(input, correlation_id)).await;
        match result {
            Ok(r) => r,
            Err(_) => Err(CoreError::Overloaded("create_memory exceeded its deadline".to_string())),
        }
    }

    async fn create_memory_inner(&self, input: CreateMemoryInput, correlation_id: &str) -> Result<Memory, CoreError> {
        let CreateMemoryInput { content, mut metadata, user_id, conversation_id } = input;

        let embedding = self
            .embedder
            .embed(&content)
            .await
            .map_err(|e| CoreError::EmbedderFailed(e.to_string()))?;

        let context_key = Self::context_key(&user_id).to_string();
        let score = self.scorer.score_and_observe(&content, &embedding, &context_key);
        if self.scorer.is_low_quality(score.composite) {
            metadata.insert("low_quality".to_string(), serde_json::Value::Bool(true));
        }

        let now = Utc::now().to_rfc3339();
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            content,
            embedding,
            metadata,
            importance_score: score.composite,
            user_id,
            conversation_id,
            created_at: now.clone(),
            last_accessed: now,
            access_count: 0,
        };

        let stored = self.store.add(memory).await?;
        self.spawn_graph_ingest(stored.id.clone(), stored.content.clone(), stored.metadata.clone());
        self.audit(AuditEventKind::Create, Some(stored.id.clone()), stored.user_id.clone(), correlation_id, "ok").await;
        Ok(stored)
    }

    /// `create_memories_batch` (§4.5): independent per-item failures, one
    /// bad item never fails the batch.
    pub async fn create_memories_batch(&self, items: Vec<CreateMemoryInput>, correlation_id: &str) -> Vec<BatchItemOutcome> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(match self.create_memory(item, correlation_id).await {
                Ok(m) => BatchItemOutcome::Ok(m),
                Err(e) => BatchItemOutcome::Err(e),
            });
        }
        out
    }

    /// `query_memories` (§4.5): embed (unless this is the empty-query
    /// recency path) and delegate to `UnifiedVectorStore`; touches each
    /// returned memory's access stats in the background.
    pub async fn query_memories(&self, text: &str, limit: u32, filters: QueryFilters, min_similarity: f32) -> Result<QueryResult, CoreError> {
        let limit = limit.clamp(1, 200) as usize;
        let min_similarity = min_similarity.clamp(0.0, 1.0);

        let result = tokio::time::timeout(self.config.read_timeout, async {
            if text.trim().is_empty() {
                self.store.get_recent(limit, &filters).await
            } else {
                let embedding = self.embedder.embed(text).await.map_err(|e| CoreError::EmbedderFailed(e.to_string()))?;
                self.store.query(&embedding, limit, &filters, min_similarity).await
            }
        })
        .await;

        let outcome = match result {
            Ok(r) => r?,
            Err(_) => return Err(CoreError::Overloaded("query_memories exceeded its deadline".to_string())),
        };

        for hit in &outcome.results {
            self.touch_in_background(hit.memory.clone());
        }

        Ok(QueryResult {
            results: outcome.results,
            served_by: outcome.served_by,
        })
    }

    /// `get_memory` (§4.5): primary-provider direct lookup (via the store's
    /// own failover), touches access stats in the background on a hit.
    pub async fn get_memory(&self, id: &str) -> Result<Option<Memory>, CoreError> {
        let result = tokio::time::timeout(self.config.read_timeout, self.store.get(id)).await;
        let found = match result {
            Ok(r) => r?,
            Err(_) => return Err(CoreError::Overloaded("get_memory exceeded its deadline".to_string())),
        };
        if let Some(memory) = &found {
            self.touch_in_background(memory.clone());
        }
        Ok(found)
    }

    /// `delete_memory` (§4.5): primary delete, mirror-best-effort fan-out
    /// (inside the store), and a fire-and-forget mention cascade (§3
    /// Lifecycle: node pruning is a separate maintenance pass).
    pub async fn delete_memory(&self, id: &str, correlation_id: &str) -> Result<(), CoreError> {
        let _guard = self.admit_write()?;
        let result = tokio::time::timeout(self.config.write_timeout, self.store.delete(id)).await;
        match result {
            Ok(Ok(())) => {
                let graph = Arc::clone(&self.graph);
                let id_owned = id.to_string();
                self.supervisor_submit_sync("graph_delete_cascade", async move { graph.on_memory_deleted(&id_owned).await });
                self.audit(AuditEventKind::Delete, Some(id.to_string()), None, correlation_id, "ok").await;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CoreError::Overloaded("delete_memory exceeded its deadline".to_string())),
        }
    }

    /// `sync_memory` (§4.5, `POST /graph/sync/{id}`): force re-ingest of an
    /// existing memory's content. Returns as soon as the memory is
    /// confirmed to exist and the re-ingest is accepted; the ingest itself
    /// runs fire-and-forget (the caller gets 202, not the `IngestSummary`).
    pub async fn sync_memory(&self, id: &str, correlation_id: &str) -> Result<(), CoreError> {
        let memory = self
            .get_memory(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("memory '{id}'")))?;

        let graph = Arc::clone(&self.graph);
        let memory_id = memory.id.clone();
        let content = memory.content.clone();
        let metadata = memory.metadata.clone();
        self.supervisor_submit_sync("graph_force_reingest", async move {
            graph.force_reingest(&memory_id, &content, &metadata).await.map(|_| ())
        });
        self.audit(AuditEventKind::GraphSync, Some(id.to_string()), memory.user_id, correlation_id, "accepted").await;
        Ok(())
    }

    pub fn store(&self) -> &Arc<UnifiedVectorStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<GraphProvider> {
        &self.graph
    }

    /// Exposed for the bulk-ingest path (not an HTTP route in §6, but
    /// wired for completeness per §4.4 "Bulk path").
    pub async fn bulk_sync(&self, memories: Vec<BulkMemoryInput>) -> Result<Vec<IngestSummary>, CoreError> {
        self.graph.bulk_ingest(&memories).await
    }
}
