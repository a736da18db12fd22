//! Core data model: memories and the entity/relationship graph derived from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The deployment-wide embedding dimension. Mixing models with different
/// dimensionality is out of scope; writers reject vectors of any other length.
pub const EMBEDDING_DIM: usize = 1536;

/// The atomic unit of storage: free-form text plus its embedding and score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub importance_score: f32,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub created_at: String,
    pub last_accessed: String,
    #[serde(default)]
    pub access_count: u64,
}

impl Memory {
    /// Record a read: bump `access_count` and `last_accessed` to now.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = chrono::Utc::now().to_rfc3339();
    }

    pub fn is_low_quality(&self) -> bool {
        self.metadata
            .get("low_quality")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Entity type recognized by extraction. Mirrors the categories the regex
/// fallback and LLM extractor both agree to emit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Technology,
    Location,
    Concept,
    Event,
    Product,
    Other,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Technology => "TECHNOLOGY",
            EntityType::Location => "LOCATION",
            EntityType::Concept => "CONCEPT",
            EntityType::Event => "EVENT",
            EntityType::Product => "PRODUCT",
            EntityType::Other => "OTHER",
        };
        write!(f, "{s}")
    }
}

impl EntityType {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "person" | "per" => EntityType::Person,
            "organization" | "org" | "company" => EntityType::Organization,
            "technology" | "tech" => EntityType::Technology,
            "location" | "loc" | "place" => EntityType::Location,
            "concept" | "con" | "idea" => EntityType::Concept,
            "event" | "evt" => EntityType::Event,
            "product" | "prod" => EntityType::Product,
            _ => EntityType::Other,
        }
    }
}

/// Relationship type between two graph nodes. Open enum: anything the rule
/// table or the LLM names but doesn't match a known variant becomes `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    WorksFor,
    Uses,
    PartOf,
    Mentions,
    RelatesTo,
    CausedBy,
    LocatedIn,
    CreatedBy,
    Custom(String),
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipType::WorksFor => write!(f, "WORKS_FOR"),
            RelationshipType::Uses => write!(f, "USES"),
            RelationshipType::PartOf => write!(f, "PART_OF"),
            RelationshipType::Mentions => write!(f, "MENTIONS"),
            RelationshipType::RelatesTo => write!(f, "RELATES_TO"),
            RelationshipType::CausedBy => write!(f, "CAUSED_BY"),
            RelationshipType::LocatedIn => write!(f, "LOCATED_IN"),
            RelationshipType::CreatedBy => write!(f, "CREATED_BY"),
            RelationshipType::Custom(s) => write!(f, "CUSTOM:{s}"),
        }
    }
}

impl RelationshipType {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "works_for" | "worksfor" | "works_at" => RelationshipType::WorksFor,
            "uses" => RelationshipType::Uses,
            "part_of" | "partof" => RelationshipType::PartOf,
            "mentions" => RelationshipType::Mentions,
            "relates_to" | "relatesto" => RelationshipType::RelatesTo,
            "caused_by" | "causedby" => RelationshipType::CausedBy,
            "located_in" | "locatedin" => RelationshipType::LocatedIn,
            "created_by" | "createdby" => RelationshipType::CreatedBy,
            other => RelationshipType::Custom(other.to_string()),
        }
    }
}

/// An entity extracted from one or more memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub entity_type: EntityType,
    /// Normalized display string. `(entity_type, normalized_name)` is unique.
    pub entity_name: String,
    pub importance_score: f32,
    pub mention_count: u64,
    pub first_seen: String,
    pub last_seen: String,
}

/// A directed edge between two graph nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from_id: String,
    pub to_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f32,
    pub confidence: f32,
    pub occurrence_count: u64,
    pub first_seen: String,
    pub last_seen: String,
}

/// A recorded occurrence of an entity inside a specific memory at a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub memory_id: String,
    pub entity_id: String,
    pub char_start: usize,
    pub char_end: usize,
    pub confidence: f32,
}

/// An audit log entry for a successful lifecycle operation on a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub kind: AuditEventKind,
    #[serde(default)]
    pub memory_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Create,
    Update,
    Delete,
    GraphSync,
}

/// Filters applied when listing audit events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditListOptions {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}
