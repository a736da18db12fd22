//! HTTP request/response bodies for the `/memories` and `/graph` surfaces (§6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_limit() -> u32 {
    10
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, 200)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoriesBatchRequest {
    pub items: Vec<CreateMemoryRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub importance_score: f32,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub created_at: String,
    pub last_accessed: String,
    pub access_count: u64,
}

impl From<crate::Memory> for MemoryRecord {
    fn from(m: crate::Memory) -> Self {
        Self {
            id: m.id,
            content: m.content,
            embedding: m.embedding,
            metadata: m.metadata,
            importance_score: m.importance_score,
            user_id: m.user_id,
            conversation_id: m.conversation_id,
            created_at: m.created_at,
            last_accessed: m.last_accessed,
            access_count: m.access_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMemoryResponse {
    pub memory: MemoryRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMemoriesBatchResponse {
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItemResult {
    Ok { memory: MemoryRecord },
    Err { error: String, error_code: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryMemoriesRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub filters: QueryFiltersDto,
    #[serde(default)]
    pub min_similarity: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFiltersDto {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QueryMemoriesRequest {
    pub fn clamped_limit(&self) -> u32 {
        clamp_limit(self.limit)
    }

    pub fn clamped_min_similarity(&self) -> f32 {
        self.min_similarity.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemoryDto {
    pub memory: MemoryRecord,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMemoriesResponse {
    pub results: Vec<ScoredMemoryDto>,
    pub served_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInventoryEntry {
    pub name: String,
    pub is_primary: bool,
    pub health: crate::ProviderHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<ProviderInventoryEntry>,
    pub graph_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphQueryRequest {
    Explore {
        entity_name: String,
        #[serde(default = "default_depth")]
        depth: u32,
        #[serde(default = "default_max_nodes")]
        max_nodes: u32,
    },
    Path {
        from_name: String,
        to_name: String,
        #[serde(default = "default_max_depth")]
        max_depth: u32,
    },
    Insights {
        memory_id: String,
    },
}

fn default_depth() -> u32 {
    1
}
fn default_max_nodes() -> u32 {
    100
}
fn default_max_depth() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeDto {
    pub id: String,
    pub entity_type: String,
    pub entity_name: String,
    pub importance_score: f32,
    pub mention_count: u64,
}

impl From<crate::GraphNode> for GraphNodeDto {
    fn from(n: crate::GraphNode) -> Self {
        Self {
            id: n.id,
            entity_type: n.entity_type.to_string(),
            entity_name: n.entity_name,
            importance_score: n.importance_score,
            mention_count: n.mention_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphRelationshipDto {
    pub from_id: String,
    pub to_id: String,
    pub relationship_type: String,
    pub strength: f32,
    pub confidence: f32,
    pub occurrence_count: u64,
}

impl From<crate::GraphRelationship> for GraphRelationshipDto {
    fn from(e: crate::GraphRelationship) -> Self {
        Self {
            from_id: e.from_id,
            to_id: e.to_id,
            relationship_type: e.relationship_type.to_string(),
            strength: e.strength,
            confidence: e.confidence,
            occurrence_count: e.occurrence_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GraphQueryResponse {
    Explore {
        nodes: Vec<GraphNodeDto>,
        edges: Vec<GraphRelationshipDto>,
    },
    Path {
        node_ids: Vec<String>,
        relationship_types: Vec<String>,
        total_strength: f32,
    },
    Insights {
        entities: Vec<GraphNodeDto>,
        edges: Vec<GraphRelationshipDto>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStatsResponse {
    pub node_count: u64,
    pub edge_count: u64,
    pub type_histogram: HashMap<String, u64>,
    pub mean_degree: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSyncResponse {
    pub accepted: bool,
    pub memory_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub correlation_id: String,
}
