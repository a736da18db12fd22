//! In-memory `GraphStore`: UPSERT-keyed nodes/edges plus BFS traversal.
//!
//! UPSERT semantics (normalize-then-merge: importance and strength take the
//! max of existing/new rather than an average) plus BFS neighbor walk and
//! shortest-path reconstruction over the in-memory adjacency maps.

use async_trait::async_trait;
use chrono::Utc;
use nexus_types::{CoreError, EntityType, GraphNode, GraphPath, GraphRelationship, GraphStats, GraphStore, Mention, RelationshipType};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

type EdgeKey = (String, String, RelationshipType);

pub struct InMemoryGraphStore {
    nodes: RwLock<HashMap<String, GraphNode>>,
    /// (entity_type, normalized_name) -> node id; the UPSERT identity key.
    type_name_index: RwLock<HashMap<(EntityType, String), String>>,
    /// normalized_name -> node ids, regardless of type, for name-only lookup.
    name_index: RwLock<HashMap<String, Vec<String>>>,
    edges: RwLock<HashMap<EdgeKey, GraphRelationship>>,
    out_index: RwLock<HashMap<String, Vec<EdgeKey>>>,
    in_index: RwLock<HashMap<String, Vec<EdgeKey>>>,
    mentions: RwLock<HashMap<String, Vec<Mention>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            type_name_index: RwLock::new(HashMap::new()),
            name_index: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashMap::new()),
            out_index: RwLock::new(HashMap::new()),
            in_index: RwLock::new(HashMap::new()),
            mentions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(
        &self,
        entity_type: &EntityType,
        normalized_name: &str,
        importance_score: f32,
    ) -> Result<GraphNode, CoreError> {
        let key = (entity_type.clone(), normalized_name.to_string());
        let now = Utc::now().to_rfc3339();

        let mut type_name_idx = self.type_name_index.write().await;
        let mut nodes = self.nodes.write().await;

        if let Some(existing_id) = type_name_idx.get(&key) {
            let node = nodes.get_mut(existing_id).expect("index/nodes out of sync");
            node.importance_score = node.importance_score.max(importance_score);
            node.mention_count += 1;
            node.last_seen = now;
            return Ok(node.clone());
        }

        let id = Uuid::new_v4().to_string();
        let node = GraphNode {
            id: id.clone(),
            entity_type: entity_type.clone(),
            entity_name: normalized_name.to_string(),
            importance_score,
            mention_count: 1,
            first_seen: now.clone(),
            last_seen: now,
        };
        nodes.insert(id.clone(), node.clone());
        type_name_idx.insert(key, id.clone());
        self.name_index
            .write()
            .await
            .entry(normalized_name.to_string())
            .or_default()
            .push(id);
        Ok(node)
    }

    async fn insert_mention(&self, mention: Mention) -> Result<(), CoreError> {
        let mut mentions = self.mentions.write().await;
        let bucket = mentions.entry(mention.memory_id.clone()).or_default();
        // (memory_id, entity_id, char_start) is unique (§3/§4.4): reprocessing
        // the same memory must not duplicate a mention at the same span.
        if bucket
            .iter()
            .any(|m| m.entity_id == mention.entity_id && m.char_start == mention.char_start)
        {
            return Ok(());
        }
        bucket.push(mention);
        Ok(())
    }

    async fn upsert_edge(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &RelationshipType,
        strength: f32,
        confidence: f32,
    ) -> Result<GraphRelationship, CoreError> {
        {
            let nodes = self.nodes.read().await;
            if !nodes.contains_key(from_id) {
                return Err(CoreError::NotFound(format!("graph node {from_id}")));
            }
            if !nodes.contains_key(to_id) {
                return Err(CoreError::NotFound(format!("graph node {to_id}")));
            }
        }

        let key: EdgeKey = (from_id.to_string(), to_id.to_string(), relationship_type.clone());
        let now = Utc::now().to_rfc3339();
        let mut edges = self.edges.write().await;

        if let Some(existing) = edges.get_mut(&key) {
            existing.strength = existing.strength.max(strength);
            existing.confidence = existing.confidence.max(confidence);
            existing.occurrence_count += 1;
            existing.last_seen = now;
            return Ok(existing.clone());
        }

        let rel = GraphRelationship {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            relationship_type: relationship_type.clone(),
            strength,
            confidence,
            occurrence_count: 1,
            first_seen: now.clone(),
            last_seen: now,
        };
        edges.insert(key.clone(), rel.clone());
        self.out_index.write().await.entry(from_id.to_string()).or_default().push(key.clone());
        self.in_index.write().await.entry(to_id.to_string()).or_default().push(key);
        Ok(rel)
    }

    async fn get_node_by_name(
        &self,
        entity_type: Option<&EntityType>,
        normalized_name: &str,
    ) -> Result<Option<GraphNode>, CoreError> {
        let nodes = self.nodes.read().await;
        if let Some(t) = entity_type {
            let idx = self.type_name_index.read().await;
            return Ok(idx
                .get(&(t.clone(), normalized_name.to_string()))
                .and_then(|id| nodes.get(id).cloned()));
        }
        let idx = self.name_index.read().await;
        let mut ids = idx.get(normalized_name).cloned().unwrap_or_default();
        ids.sort();
        Ok(ids.first().and_then(|id| nodes.get(id).cloned()))
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, CoreError> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn neighbors(&self, node_id: &str, depth: usize, max_nodes: usize) -> Result<Vec<GraphNode>, CoreError> {
        if depth == 0 || max_nodes == 0 {
            return Ok(Vec::new());
        }
        let nodes = self.nodes.read().await;
        if !nodes.contains_key(node_id) {
            return Err(CoreError::NotFound(format!("graph node {node_id}")));
        }
        let out_idx = self.out_index.read().await;
        let in_idx = self.in_index.read().await;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.to_string());
        let mut frontier: Vec<String> = vec![node_id.to_string()];
        let mut result: Vec<GraphNode> = Vec::new();

        for _ in 0..depth {
            let mut next_frontier: Vec<String> = Vec::new();
            let mut level_neighbors: Vec<String> = Vec::new();
            for current in &frontier {
                for (from, to, _) in out_idx.get(current).cloned().unwrap_or_default() {
                    debug_assert_eq!(&from, current);
                    level_neighbors.push(to);
                }
                for (from, to, _) in in_idx.get(current).cloned().unwrap_or_default() {
                    debug_assert_eq!(&to, current);
                    level_neighbors.push(from);
                }
            }
            level_neighbors.sort();
            level_neighbors.dedup();
            for id in level_neighbors {
                if visited.insert(id.clone()) {
                    if let Some(n) = nodes.get(&id) {
                        result.push(n.clone());
                        if result.len() >= max_nodes {
                            return Ok(result);
                        }
                    }
                    next_frontier.push(id);
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        Ok(result)
    }

    async fn shortest_path(&self, from_id: &str, to_id: &str, max_depth: usize) -> Result<Option<GraphPath>, CoreError> {
        {
            let nodes = self.nodes.read().await;
            if !nodes.contains_key(from_id) {
                return Err(CoreError::NotFound(format!("graph node {from_id}")));
            }
            if !nodes.contains_key(to_id) {
                return Err(CoreError::NotFound(format!("graph node {to_id}")));
            }
        }
        if from_id == to_id {
            return Ok(Some(GraphPath {
                node_ids: vec![from_id.to_string()],
                relationship_types: Vec::new(),
                total_strength: 0.0,
            }));
        }
        if max_depth == 0 {
            return Ok(None);
        }

        let edges = self.edges.read().await;
        let out_idx = self.out_index.read().await;
        let in_idx = self.in_index.read().await;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from_id.to_string());
        let mut prev: HashMap<String, EdgeKey> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((from_id.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut transitions: Vec<(String, EdgeKey)> = Vec::new();
            for key @ (from, to, _) in out_idx.get(&current).cloned().unwrap_or_default() {
                debug_assert_eq!(&from, &current);
                transitions.push((to, key));
            }
            for key @ (from, to, _) in in_idx.get(&current).cloned().unwrap_or_default() {
                debug_assert_eq!(&to, &current);
                transitions.push((from, key));
            }
            transitions.sort_by(|a, b| a.0.cmp(&b.0));

            for (next_id, key) in transitions {
                if visited.contains(&next_id) {
                    continue;
                }
                visited.insert(next_id.clone());
                prev.insert(next_id.clone(), key);
                if next_id == to_id {
                    let mut rev_ids = vec![to_id.to_string()];
                    let mut rev_types = Vec::new();
                    let mut total_strength = 0.0f32;
                    let mut cursor = to_id.to_string();
                    while cursor != from_id {
                        let k = prev.get(&cursor).expect("path reconstruction");
                        let edge = edges.get(k).expect("edge indexed but missing");
                        total_strength += edge.strength;
                        rev_types.push(edge.relationship_type.clone());
                        cursor = if k.0 == cursor { k.1.clone() } else { k.0.clone() };
                        rev_ids.push(cursor.clone());
                    }
                    rev_ids.reverse();
                    rev_types.reverse();
                    return Ok(Some(GraphPath {
                        node_ids: rev_ids,
                        relationship_types: rev_types,
                        total_strength,
                    }));
                }
                queue.push_back((next_id, depth + 1));
            }
        }
        Ok(None)
    }

    async fn mentions_for_memory(&self, memory_id: &str) -> Result<Vec<Mention>, CoreError> {
        Ok(self.mentions.read().await.get(memory_id).cloned().unwrap_or_default())
    }

    async fn edges_among(&self, node_ids: &[String]) -> Result<Vec<GraphRelationship>, CoreError> {
        let set: HashSet<&String> = node_ids.iter().collect();
        let edges = self.edges.read().await;
        Ok(edges
            .values()
            .filter(|e| set.contains(&e.from_id) && set.contains(&e.to_id))
            .cloned()
            .collect())
    }

    async fn delete_mentions_for_memory(&self, memory_id: &str) -> Result<(), CoreError> {
        self.mentions.write().await.remove(memory_id);
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, CoreError> {
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        let mut type_histogram: HashMap<String, u64> = HashMap::new();
        for node in nodes.values() {
            *type_histogram.entry(node.entity_type.to_string()).or_insert(0) += 1;
        }
        let node_count = nodes.len() as u64;
        let edge_count = edges.len() as u64;
        let mean_degree = if node_count == 0 { 0.0 } else { (2 * edge_count) as f64 / node_count as f64 };
        Ok(GraphStats { node_count, edge_count, type_histogram, mean_degree })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_node_merges_on_same_type_and_name() {
        let store = InMemoryGraphStore::new();
        let a = store.upsert_node(&EntityType::Person, "ada lovelace", 0.4).await.unwrap();
        let b = store.upsert_node(&EntityType::Person, "ada lovelace", 0.6).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.mention_count, 2);
        assert!((b.importance_score - 0.6).abs() < 1e-6);

        // idempotence: re-observing a lower score never lowers the node's importance
        let c = store.upsert_node(&EntityType::Person, "ada lovelace", 0.1).await.unwrap();
        assert!((c.importance_score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn different_entity_types_do_not_merge() {
        let store = InMemoryGraphStore::new();
        let a = store.upsert_node(&EntityType::Person, "mercury", 0.5).await.unwrap();
        let b = store.upsert_node(&EntityType::Product, "mercury", 0.5).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn shortest_path_across_two_hops() {
        let store = InMemoryGraphStore::new();
        let a = store.upsert_node(&EntityType::Person, "a", 0.5).await.unwrap();
        let b = store.upsert_node(&EntityType::Person, "b", 0.5).await.unwrap();
        let c = store.upsert_node(&EntityType::Person, "c", 0.5).await.unwrap();
        store.upsert_edge(&a.id, &b.id, &RelationshipType::RelatesTo, 0.9, 0.9).await.unwrap();
        store.upsert_edge(&b.id, &c.id, &RelationshipType::RelatesTo, 0.8, 0.8).await.unwrap();

        let path = store.shortest_path(&a.id, &c.id, 5).await.unwrap().unwrap();
        assert_eq!(path.node_ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);
        assert_eq!(path.relationship_types.len(), 2);
    }

    #[tokio::test]
    async fn neighbors_respects_max_nodes() {
        let store = InMemoryGraphStore::new();
        let hub = store.upsert_node(&EntityType::Concept, "hub", 0.5).await.unwrap();
        for name in ["leaf1", "leaf2", "leaf3"] {
            let leaf = store.upsert_node(&EntityType::Concept, name, 0.5).await.unwrap();
            store.upsert_edge(&hub.id, &leaf.id, &RelationshipType::RelatesTo, 0.5, 0.5).await.unwrap();
        }
        let neighbors = store.neighbors(&hub.id, 1, 2).await.unwrap();
        assert_eq!(neighbors.len(), 2);
    }

    #[tokio::test]
    async fn stats_reports_histogram_and_mean_degree() {
        let store = InMemoryGraphStore::new();
        let a = store.upsert_node(&EntityType::Person, "a", 0.5).await.unwrap();
        let b = store.upsert_node(&EntityType::Organization, "b", 0.5).await.unwrap();
        store.upsert_edge(&a.id, &b.id, &RelationshipType::WorksFor, 0.7, 0.7).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.type_histogram.get("PERSON"), Some(&1));
    }
}
