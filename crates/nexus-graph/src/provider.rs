//! `GraphProvider`: the extraction pipeline and graph queries of §4.4,
//! composed fresh from the `EntityExtractor`/`GraphStore` capability
//! contracts and the ADM scorer. Gated end-to-end by `graph_enabled`: when
//! disabled, `ingest`/`bulk_ingest` are no-ops and every query returns
//! `CoreError::GraphDisabled` (§4.4 "Enablement flag").

use crate::normalize::{normalize_entity_name, normalize_name_loose};
use nexus_scoring::AdmScorer;
use nexus_types::{
    CoreError, EntityExtractor, EntityType, ExtractedMention, GraphNode, GraphPath,
    GraphRelationship, GraphStats, GraphStore, Mention, RelationshipType,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sliding window (chars) within which two mentions in the same memory are
/// considered for a candidate relationship (§4.4 point 5).
pub const DEFAULT_WINDOW: usize = 240;

#[derive(Debug, Clone)]
pub struct GraphProviderConfig {
    pub window: usize,
    /// Upper bound `path`/`explore` accept for `max_depth`/`depth`, per the
    /// backend constraints in §4.4 ("max_depth <= 5").
    pub max_depth_limit: usize,
}

impl Default for GraphProviderConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_depth_limit: 5,
        }
    }
}

/// Per-memory ingest outcome, mostly useful for logging/metrics and the
/// `POST /graph/sync/{memory_id}` response.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestSummary {
    pub memory_id: String,
    pub mentions_inserted: usize,
    pub nodes_touched: usize,
    pub edges_touched: usize,
    pub already_ingested: bool,
}

/// A memory as handed to `bulk_ingest`: just enough to extract and UPSERT
/// from, independent of how the caller stores the memory itself.
#[derive(Debug, Clone)]
pub struct BulkMemoryInput {
    pub memory_id: String,
    pub content: String,
}

pub struct GraphProvider {
    store: Arc<dyn GraphStore>,
    extractor: Arc<dyn EntityExtractor>,
    scorer: Arc<AdmScorer>,
    config: GraphProviderConfig,
    enabled: AtomicBool,
}

fn validate_entity_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.len() > 255 {
        return Err(CoreError::InvalidInput(
            "entity name must be 1-255 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == ' ' || c.is_whitespace())
    {
        return Err(CoreError::InvalidInput(
            "entity name contains characters outside the allowed whitelist".to_string(),
        ));
    }
    Ok(())
}

/// Small rule table over `(from_type, to_type, connective)`; falls back to
/// `RELATES_TO` when nothing matches (§4.4 point 5).
fn infer_relationship_type(from_type: &EntityType, to_type: &EntityType, connective: &str) -> RelationshipType {
    let c = connective.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| c.contains(n));

    if contains_any(&["works for", "work for", "works at", "work at", "employed by"]) {
        return RelationshipType::WorksFor;
    }
    if contains_any(&["uses", "use", "built with", "powered by", "runs on"]) {
        return RelationshipType::Uses;
    }
    if contains_any(&["part of", "subsidiary of", "division of", "belongs to"]) {
        return RelationshipType::PartOf;
    }
    if contains_any(&["caused by", "because of", "due to", "resulted from"]) {
        return RelationshipType::CausedBy;
    }
    if contains_any(&["located in", "based in", "headquartered in", "situated in"]) {
        return RelationshipType::LocatedIn;
    }
    if contains_any(&["created by", "built by", "developed by", "founded by", "authored by"]) {
        return RelationshipType::CreatedBy;
    }
    match (from_type, to_type) {
        (EntityType::Person, EntityType::Organization) => RelationshipType::WorksFor,
        (EntityType::Organization, EntityType::Technology) | (EntityType::Person, EntityType::Technology) => {
            RelationshipType::Uses
        }
        _ => RelationshipType::RelatesTo,
    }
}

impl GraphProvider {
    pub fn new(store: Arc<dyn GraphStore>, extractor: Arc<dyn EntityExtractor>, scorer: Arc<AdmScorer>, config: GraphProviderConfig, enabled: bool) -> Self {
        Self {
            store,
            extractor,
            scorer,
            config,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn require_enabled(&self) -> Result<(), CoreError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(CoreError::GraphDisabled)
        }
    }

    /// Single-memory streaming ingest (§4.4 points 1-6). A no-op, not an
    /// error, when the graph subsystem is disabled — graph failures/state
    /// must never affect the primary write (§9 fail-soft rule).
    pub async fn ingest(&self, memory_id: &str, content: &str, _metadata: &HashMap<String, serde_json::Value>) -> Result<IngestSummary, CoreError> {
        if !self.is_enabled() {
            return Ok(IngestSummary {
                memory_id: memory_id.to_string(),
                ..Default::default()
            });
        }

        // Idempotence (§8 property 5, §4.4 "Bulk ingest is idempotent"):
        // reprocessing a memory that already has mentions is a pure no-op.
        if !self.store.mentions_for_memory(memory_id).await?.is_empty() {
            return Ok(IngestSummary {
                memory_id: memory_id.to_string(),
                already_ingested: true,
                ..Default::default()
            });
        }

        let extraction = self
            .extractor
            .extract(content)
            .await
            .map_err(|e| CoreError::InvalidInput(format!("extraction failed: {e}")))?;

        let mut mentions = extraction.mentions;
        mentions.sort_by_key(|m| m.char_start);

        let content_score = self.scorer.score(content, None, memory_id, None).composite;

        let mut resolved: Vec<(ExtractedMention, GraphNode)> = Vec::with_capacity(mentions.len());
        let mut mentions_inserted = 0usize;
        for m in mentions {
            let normalized = normalize_entity_name(&m.entity_type, &m.surface_form);
            let node = self
                .store
                .upsert_node(&m.entity_type, &normalized, (m.confidence * content_score).clamp(0.0, 1.0))
                .await?;
            self.store
                .insert_mention(Mention {
                    memory_id: memory_id.to_string(),
                    entity_id: node.id.clone(),
                    char_start: m.char_start,
                    char_end: m.char_end,
                    confidence: m.confidence,
                })
                .await?;
            mentions_inserted += 1;
            resolved.push((m, node));
        }

        let mut edges_touched = 0usize;
        for i in 0..resolved.len() {
            for j in (i + 1)..resolved.len() {
                let (mention_a, node_a) = &resolved[i];
                let (mention_b, node_b) = &resolved[j];
                if node_a.id == node_b.id {
                    continue;
                }
                let distance = mention_b.char_start.saturating_sub(mention_a.char_end) as f32;
                if distance > self.config.window as f32 {
                    continue;
                }
                let connective_start = mention_a.char_end.min(content.len());
                let connective_end = mention_b.char_start.min(content.len()).max(connective_start);
                let connective = &content[connective_start..connective_end];

                let relationship_type = infer_relationship_type(&mention_a.entity_type, &mention_b.entity_type, connective);
                let base_strength = (-distance / self.config.window as f32).exp() * mention_a.confidence * mention_b.confidence;
                let strength = self.scorer.score_relationship(&mention_a.surface_form, &mention_b.surface_form, Some(connective), base_strength, &[]);
                if !self.scorer.meets_min_strength(strength) {
                    continue;
                }
                let confidence = (mention_a.confidence + mention_b.confidence) / 2.0;
                self.store.upsert_edge(&node_a.id, &node_b.id, &relationship_type, strength, confidence).await?;
                edges_touched += 1;
            }
        }

        // Relations the extractor surfaced directly (the LLM bulk path):
        // resolve each endpoint by loose name lookup and UPSERT the same way.
        for r in extraction.relations {
            let from = self.store.get_node_by_name(None, &normalize_name_loose(&r.from_surface)).await?;
            let to = self.store.get_node_by_name(None, &normalize_name_loose(&r.to_surface)).await?;
            let (Some(from), Some(to)) = (from, to) else { continue };
            if from.id == to.id {
                continue;
            }
            let strength = self.scorer.score_relationship(&r.from_surface, &r.to_surface, None, r.confidence, &[]);
            if !self.scorer.meets_min_strength(strength) {
                continue;
            }
            self.store.upsert_edge(&from.id, &to.id, &r.relationship_type, strength, r.confidence).await?;
            edges_touched += 1;
        }

        Ok(IngestSummary {
            memory_id: memory_id.to_string(),
            mentions_inserted,
            nodes_touched: resolved.len(),
            edges_touched,
            already_ingested: false,
        })
    }

    /// Force re-ingestion (§6 `POST /graph/sync/{memory_id}`): drops this
    /// memory's existing mentions first, bypassing the idempotence guard in
    /// `ingest` that treats a memory with mentions already recorded as a
    /// no-op. Nodes and edges created by the prior ingest are left in place
    /// and simply get re-touched by the fresh pass.
    pub async fn force_reingest(&self, memory_id: &str, content: &str, metadata: &HashMap<String, serde_json::Value>) -> Result<IngestSummary, CoreError> {
        if !self.is_enabled() {
            return Ok(IngestSummary {
                memory_id: memory_id.to_string(),
                ..Default::default()
            });
        }
        self.store.delete_mentions_for_memory(memory_id).await?;
        self.ingest(memory_id, content, metadata).await
    }

    /// Bulk path (§4.4 "Bulk path"): batches memories to the configured
    /// extractor's `extract_batch` (the LLM path when wired that way) and
    /// applies the same per-memory UPSERT logic. Idempotent per memory.
    pub async fn bulk_ingest(&self, memories: &[BulkMemoryInput]) -> Result<Vec<IngestSummary>, CoreError> {
        if !self.is_enabled() {
            return Ok(memories
                .iter()
                .map(|m| IngestSummary {
                    memory_id: m.memory_id.clone(),
                    ..Default::default()
                })
                .collect());
        }
        let mut summaries = Vec::with_capacity(memories.len());
        for m in memories {
            summaries.push(self.ingest(&m.memory_id, &m.content, &HashMap::new()).await?);
        }
        Ok(summaries)
    }

    /// `explore(entity_name, depth, max_nodes)` (§4.4 Queries).
    pub async fn explore(&self, entity_name: &str, depth: usize, max_nodes: usize) -> Result<(Vec<GraphNode>, Vec<GraphRelationship>), CoreError> {
        self.require_enabled()?;
        validate_entity_name(entity_name)?;
        let depth = depth.min(self.config.max_depth_limit);
        let normalized = normalize_name_loose(entity_name);
        let root = self
            .store
            .get_node_by_name(None, &normalized)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("entity '{entity_name}'")))?;
        let mut nodes = self.store.neighbors(&root.id, depth.max(1), max_nodes).await?;
        nodes.insert(0, root);
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edges = self.store.edges_among(&ids).await?;
        Ok((nodes, edges))
    }

    /// `path(from_name, to_name, max_depth)` (§4.4 Queries).
    pub async fn path(&self, from_name: &str, to_name: &str, max_depth: usize) -> Result<Option<GraphPath>, CoreError> {
        self.require_enabled()?;
        validate_entity_name(from_name)?;
        validate_entity_name(to_name)?;
        if max_depth > self.config.max_depth_limit {
            return Err(CoreError::InvalidInput(format!(
                "max_depth must be <= {}",
                self.config.max_depth_limit
            )));
        }
        let from = self
            .store
            .get_node_by_name(None, &normalize_name_loose(from_name))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("entity '{from_name}'")))?;
        let to = self
            .store
            .get_node_by_name(None, &normalize_name_loose(to_name))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("entity '{to_name}'")))?;
        self.store.shortest_path(&from.id, &to.id, max_depth).await
    }

    /// `insights(memory_id)` (§4.4 Queries): entities mentioned in this
    /// memory, their global importance, and the strongest edges among them.
    pub async fn insights(&self, memory_id: &str) -> Result<(Vec<GraphNode>, Vec<GraphRelationship>), CoreError> {
        self.require_enabled()?;
        let mentions = self.store.mentions_for_memory(memory_id).await?;
        let mut ids: Vec<String> = mentions.into_iter().map(|m| m.entity_id).collect();
        ids.sort();
        ids.dedup();
        let mut nodes = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(n) = self.store.get_node(id).await? {
                nodes.push(n);
            }
        }
        let mut edges = self.store.edges_among(&ids).await?;
        edges.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        Ok((nodes, edges))
    }

    /// `stats()` (§4.4 Queries).
    pub async fn stats(&self) -> Result<GraphStats, CoreError> {
        self.require_enabled()?;
        self.store.stats().await
    }

    /// Cascade delete: called when a memory is deleted (§3 Lifecycle).
    /// Nodes are left in place for a separate pruning pass.
    pub async fn on_memory_deleted(&self, memory_id: &str) -> Result<(), CoreError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.store.delete_mentions_for_memory(memory_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryGraphStore;
    use async_trait::async_trait;
    use nexus_scoring::{AdmScorer, AdmThresholds, AdmWeights};
    use nexus_types::{ExtractionResult, ExtractorError};

    struct FixedExtractor(ExtractionResult);

    #[async_trait]
    impl EntityExtractor for FixedExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractionResult, ExtractorError> {
            Ok(self.0.clone())
        }
    }

    fn extraction_for(content: &str) -> ExtractionResult {
        let alice = content.find("Alice").unwrap();
        let acme = content.find("Acme").unwrap();
        ExtractionResult {
            mentions: vec![
                ExtractedMention {
                    entity_type: EntityType::Person,
                    surface_form: "Alice".to_string(),
                    char_start: alice,
                    char_end: alice + 5,
                    confidence: 0.9,
                },
                ExtractedMention {
                    entity_type: EntityType::Organization,
                    surface_form: "Acme".to_string(),
                    char_start: acme,
                    char_end: acme + 4,
                    confidence: 0.9,
                },
            ],
            relations: vec![],
        }
    }

    fn low_threshold_scorer() -> Arc<AdmScorer> {
        Arc::new(AdmScorer::new(
            AdmWeights::default(),
            AdmThresholds { min_quality: 0.0, min_strength: 0.01 },
        ))
    }

    #[tokio::test]
    async fn ingest_builds_nodes_and_an_edge() {
        let content = "Alice works for Acme.";
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(FixedExtractor(extraction_for(content)));
        let provider = GraphProvider::new(store.clone(), extractor, low_threshold_scorer(), GraphProviderConfig::default(), true);

        let summary = provider.ingest("m1", content, &HashMap::new()).await.unwrap();
        assert_eq!(summary.nodes_touched, 2);
        assert_eq!(summary.edges_touched, 1);

        let stats = provider.stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
    }

    #[tokio::test]
    async fn reingesting_same_memory_is_a_no_op() {
        let content = "Alice works for Acme.";
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(FixedExtractor(extraction_for(content)));
        let provider = GraphProvider::new(store.clone(), extractor, low_threshold_scorer(), GraphProviderConfig::default(), true);

        provider.ingest("m1", content, &HashMap::new()).await.unwrap();
        let second = provider.ingest("m1", content, &HashMap::new()).await.unwrap();
        assert!(second.already_ingested);

        let stats = provider.stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
    }

    #[tokio::test]
    async fn disabled_graph_is_a_no_op_and_rejects_queries() {
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(FixedExtractor(extraction_for("Alice works for Acme.")));
        let provider = GraphProvider::new(store, extractor, low_threshold_scorer(), GraphProviderConfig::default(), false);

        let summary = provider.ingest("m1", "Alice works for Acme.", &HashMap::new()).await.unwrap();
        assert_eq!(summary.nodes_touched, 0);
        assert!(matches!(provider.stats().await, Err(CoreError::GraphDisabled)));
        assert!(matches!(provider.explore("alice", 1, 10).await, Err(CoreError::GraphDisabled)));
    }

    #[tokio::test]
    async fn explore_finds_neighbor_by_entity_name() {
        let content = "Alice works for Acme.";
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(FixedExtractor(extraction_for(content)));
        let provider = GraphProvider::new(store, extractor, low_threshold_scorer(), GraphProviderConfig::default(), true);
        provider.ingest("m1", content, &HashMap::new()).await.unwrap();

        let (nodes, edges) = provider.explore("alice", 1, 10).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn force_reingest_bypasses_idempotence_guard() {
        let content = "Alice works for Acme.";
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(FixedExtractor(extraction_for(content)));
        let provider = GraphProvider::new(store, extractor, low_threshold_scorer(), GraphProviderConfig::default(), true);

        provider.ingest("m1", content, &HashMap::new()).await.unwrap();
        let forced = provider.force_reingest("m1", content, &HashMap::new()).await.unwrap();
        assert!(!forced.already_ingested);
        assert_eq!(forced.nodes_touched, 2);

        let stats = provider.stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
    }
}
