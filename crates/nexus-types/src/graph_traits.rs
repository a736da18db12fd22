//! Trait contracts for the graph storage backend and the pluggable
//! embedding/extraction collaborators.

use crate::{CoreError, GraphNode, GraphRelationship, Mention};
use async_trait::async_trait;

/// A single detected occurrence of an entity in a text, before it is
/// resolved to a `GraphNode`.
#[derive(Debug, Clone)]
pub struct ExtractedMention {
    pub entity_type: crate::EntityType,
    pub surface_form: String,
    pub char_start: usize,
    pub char_end: usize,
    pub confidence: f32,
}

/// A candidate relationship between two surface forms, before ADM scoring.
#[derive(Debug, Clone)]
pub struct ExtractedRelation {
    pub from_surface: String,
    pub to_surface: String,
    pub relationship_type: crate::RelationshipType,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub mentions: Vec<ExtractedMention>,
    pub relations: Vec<ExtractedRelation>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor error: {0}")]
    Other(String),
}

/// Entity/relationship extractor: text -> mentions + candidate relations.
/// Implementations are the single-memory regex fallback and the
/// LLM-backed bulk extractor; the graph provider prefers the former when
/// configured and falls back to the latter's per-memory mode otherwise.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractorError>;

    /// Batch form used by the bulk ingest path. Default: sequential `extract`.
    /// Implementations that call out to a batch-capable LLM API override this.
    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<ExtractionResult>, ExtractorError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.extract(t).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    #[error("embedder error: {0}")]
    Other(String),
    #[error("empty response")]
    EmptyResponse,
}

/// Text -> dense vector(s). Treated as an opaque external capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let v = self.embed_batch(&[text.to_string()]).await?;
        v.into_iter().next().ok_or(EmbedderError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Ordered hop from a BFS/shortest-path traversal.
#[derive(Debug, Clone)]
pub struct GraphPath {
    pub node_ids: Vec<String>,
    pub relationship_types: Vec<crate::RelationshipType>,
    pub total_strength: f32,
}

/// The property-graph storage capability: node/edge UPSERT and the graph
/// queries in §4.4. Separate from `EntityExtractor`, which only produces
/// candidates; this trait owns persistence and traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert-or-update a node keyed on `(entity_type, normalized_name)`.
    /// Returns the node's id (fresh on insert, existing on update).
    async fn upsert_node(
        &self,
        entity_type: &crate::EntityType,
        normalized_name: &str,
        importance_score: f32,
    ) -> Result<GraphNode, CoreError>;

    async fn insert_mention(&self, mention: Mention) -> Result<(), CoreError>;

    /// Insert-or-update an edge keyed on `(from_id, to_id, relationship_type)`.
    async fn upsert_edge(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &crate::RelationshipType,
        strength: f32,
        confidence: f32,
    ) -> Result<GraphRelationship, CoreError>;

    async fn get_node_by_name(
        &self,
        entity_type: Option<&crate::EntityType>,
        normalized_name: &str,
    ) -> Result<Option<GraphNode>, CoreError>;

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, CoreError>;

    async fn neighbors(&self, node_id: &str, depth: usize, max_nodes: usize) -> Result<Vec<GraphNode>, CoreError>;

    async fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        max_depth: usize,
    ) -> Result<Option<GraphPath>, CoreError>;

    async fn mentions_for_memory(&self, memory_id: &str) -> Result<Vec<Mention>, CoreError>;

    async fn edges_among(&self, node_ids: &[String]) -> Result<Vec<GraphRelationship>, CoreError>;

    /// Remove all mentions for a memory (called on memory delete). Nodes
    /// and edges are left in place for a separate maintenance pass.
    async fn delete_mentions_for_memory(&self, memory_id: &str) -> Result<(), CoreError>;

    async fn stats(&self) -> Result<GraphStats, CoreError>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub type_histogram: std::collections::HashMap<String, u64>,
    pub mean_degree: f64,
}

/// Append-only audit log with filtered listing.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: crate::AuditEvent) -> Result<(), CoreError>;
    async fn list(&self, opts: &crate::AuditListOptions) -> Result<Vec<crate::AuditEvent>, CoreError>;
}
