//! SQLite-backed `GraphStore` (persistence option for single-node
//! deployments; §4.4 "not a general graph database" — traversal loads the
//! working set into memory per call rather than issuing recursive SQL).

use async_trait::async_trait;
use chrono::Utc;
use nexus_types::{CoreError, EntityType, GraphNode, GraphPath, GraphRelationship, GraphStats, GraphStore, Mention, RelationshipType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use uuid::Uuid;

pub struct SqliteGraphStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteGraphStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| CoreError::StoreFailed(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| CoreError::StoreFailed(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), CoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                importance_score REAL NOT NULL,
                mention_count INTEGER NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE(entity_type, entity_name)
            );

            CREATE TABLE IF NOT EXISTS graph_relationships (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                strength REAL NOT NULL,
                confidence REAL NOT NULL,
                occurrence_count INTEGER NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, relationship_type),
                FOREIGN KEY (from_id) REFERENCES graph_nodes(id),
                FOREIGN KEY (to_id) REFERENCES graph_nodes(id)
            );

            CREATE TABLE IF NOT EXISTS memory_entity_map (
                memory_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                confidence REAL NOT NULL,
                UNIQUE(memory_id, entity_id, char_start)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_name ON graph_nodes(entity_name);
            CREATE INDEX IF NOT EXISTS idx_rel_from ON graph_relationships(from_id);
            CREATE INDEX IF NOT EXISTS idx_rel_to ON graph_relationships(to_id);
            CREATE INDEX IF NOT EXISTS idx_mentions_memory ON memory_entity_map(memory_id);
            "#,
        )
        .map_err(|e| CoreError::StoreFailed(e.to_string()))
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::StoreFailed(format!("graph store lock poisoned: {e}")))?;
        f(&conn).map_err(|e| CoreError::StoreFailed(e.to_string()))
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
        let entity_type_raw: String = row.get(1)?;
        Ok(GraphNode {
            id: row.get(0)?,
            entity_type: EntityType::from_str_loose(&entity_type_raw),
            entity_name: row.get(2)?,
            importance_score: row.get(3)?,
            mention_count: row.get::<_, i64>(4)? as u64,
            first_seen: row.get(5)?,
            last_seen: row.get(6)?,
        })
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<GraphRelationship> {
        let rel_type_raw: String = row.get(2)?;
        Ok(GraphRelationship {
            from_id: row.get(0)?,
            to_id: row.get(1)?,
            relationship_type: RelationshipType::from_str_loose(&rel_type_raw),
            strength: row.get(3)?,
            confidence: row.get(4)?,
            occurrence_count: row.get::<_, i64>(5)? as u64,
            first_seen: row.get(6)?,
            last_seen: row.get(7)?,
        })
    }

    fn load_adjacency(&self) -> Result<(HashMap<String, Vec<(String, String)>>, HashMap<String, Vec<(String, String)>>, Vec<GraphRelationship>), CoreError> {
        let edges = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_id, to_id, relationship_type, strength, confidence, occurrence_count, first_seen, last_seen FROM graph_relationships",
            )?;
            let rows = stmt.query_map([], Self::row_to_edge)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;

        let mut out_idx: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut in_idx: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for e in &edges {
            out_idx.entry(e.from_id.clone()).or_default().push((e.to_id.clone(), e.relationship_type.to_string()));
            in_idx.entry(e.to_id.clone()).or_default().push((e.from_id.clone(), e.relationship_type.to_string()));
        }
        Ok((out_idx, in_idx, edges))
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, entity_type: &EntityType, normalized_name: &str, importance_score: f32) -> Result<GraphNode, CoreError> {
        let entity_type_str = entity_type.to_string();
        let name = normalized_name.to_string();
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id, entity_type, entity_name, importance_score, mention_count, first_seen, last_seen
                     FROM graph_nodes WHERE entity_type = ?1 AND entity_name = ?2",
                    rusqlite::params![entity_type_str, name],
                    Self::row_to_node,
                )
                .ok();

            if let Some(node) = existing {
                let merged_importance = node.importance_score.max(importance_score);
                conn.execute(
                    "UPDATE graph_nodes SET importance_score = ?1, mention_count = mention_count + 1, last_seen = ?2 WHERE id = ?3",
                    rusqlite::params![merged_importance, now, node.id],
                )?;
                return Ok(GraphNode {
                    importance_score: merged_importance,
                    mention_count: node.mention_count + 1,
                    last_seen: now.clone(),
                    ..node
                });
            }

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO graph_nodes (id, entity_type, entity_name, importance_score, mention_count, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                rusqlite::params![id, entity_type_str, name, importance_score, now],
            )?;
            Ok(GraphNode {
                id,
                entity_type: entity_type.clone(),
                entity_name: name.clone(),
                importance_score,
                mention_count: 1,
                first_seen: now.clone(),
                last_seen: now,
            })
        })
    }

    async fn insert_mention(&self, mention: Mention) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO memory_entity_map (memory_id, entity_id, char_start, char_end, confidence) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![mention.memory_id, mention.entity_id, mention.char_start as i64, mention.char_end as i64, mention.confidence],
            )?;
            Ok(())
        })
    }

    async fn upsert_edge(&self, from_id: &str, to_id: &str, relationship_type: &RelationshipType, strength: f32, confidence: f32) -> Result<GraphRelationship, CoreError> {
        let rel_type_str = relationship_type.to_string();
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            let nodes_exist: i64 = conn.query_row(
                "SELECT COUNT(*) FROM graph_nodes WHERE id IN (?1, ?2)",
                rusqlite::params![from_id, to_id],
                |row| row.get(0),
            )?;
            if nodes_exist < 2 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }

            let existing = conn
                .query_row(
                    "SELECT from_id, to_id, relationship_type, strength, confidence, occurrence_count, first_seen, last_seen
                     FROM graph_relationships WHERE from_id = ?1 AND to_id = ?2 AND relationship_type = ?3",
                    rusqlite::params![from_id, to_id, rel_type_str],
                    Self::row_to_edge,
                )
                .ok();

            if let Some(edge) = existing {
                let merged_strength = edge.strength.max(strength);
                let merged_confidence = edge.confidence.max(confidence);
                conn.execute(
                    "UPDATE graph_relationships SET strength = ?1, confidence = ?2, occurrence_count = occurrence_count + 1, last_seen = ?3
                     WHERE from_id = ?4 AND to_id = ?5 AND relationship_type = ?6",
                    rusqlite::params![merged_strength, merged_confidence, now, from_id, to_id, rel_type_str],
                )?;
                return Ok(GraphRelationship {
                    strength: merged_strength,
                    confidence: merged_confidence,
                    occurrence_count: edge.occurrence_count + 1,
                    last_seen: now.clone(),
                    ..edge
                });
            }

            conn.execute(
                "INSERT INTO graph_relationships (from_id, to_id, relationship_type, strength, confidence, occurrence_count, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                rusqlite::params![from_id, to_id, rel_type_str, strength, confidence, now],
            )?;
            Ok(GraphRelationship {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                relationship_type: relationship_type.clone(),
                strength,
                confidence,
                occurrence_count: 1,
                first_seen: now.clone(),
                last_seen: now,
            })
        })
        .map_err(|e| match e {
            CoreError::StoreFailed(ref msg) if msg.contains("Query returned no rows") => {
                CoreError::NotFound(format!("graph node {from_id} or {to_id}"))
            }
            other => other,
        })
    }

    async fn get_node_by_name(&self, entity_type: Option<&EntityType>, normalized_name: &str) -> Result<Option<GraphNode>, CoreError> {
        self.with_conn(|conn| {
            let result = if let Some(t) = entity_type {
                conn.query_row(
                    "SELECT id, entity_type, entity_name, importance_score, mention_count, first_seen, last_seen
                     FROM graph_nodes WHERE entity_type = ?1 AND entity_name = ?2",
                    rusqlite::params![t.to_string(), normalized_name],
                    Self::row_to_node,
                )
            } else {
                conn.query_row(
                    "SELECT id, entity_type, entity_name, importance_score, mention_count, first_seen, last_seen
                     FROM graph_nodes WHERE entity_name = ?1 ORDER BY id ASC LIMIT 1",
                    rusqlite::params![normalized_name],
                    Self::row_to_node,
                )
            };
            match result {
                Ok(n) => Ok(Some(n)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, CoreError> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, entity_type, entity_name, importance_score, mention_count, first_seen, last_seen FROM graph_nodes WHERE id = ?1",
                rusqlite::params![id],
                Self::row_to_node,
            );
            match result {
                Ok(n) => Ok(Some(n)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    async fn neighbors(&self, node_id: &str, depth: usize, max_nodes: usize) -> Result<Vec<GraphNode>, CoreError> {
        if depth == 0 || max_nodes == 0 {
            return Ok(Vec::new());
        }
        if self.get_node(node_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("graph node {node_id}")));
        }
        let (out_idx, in_idx, _) = self.load_adjacency()?;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.to_string());
        let mut frontier = vec![node_id.to_string()];
        let mut result_ids: Vec<String> = Vec::new();

        for _ in 0..depth {
            let mut level: Vec<String> = Vec::new();
            for current in &frontier {
                for (to, _) in out_idx.get(current).cloned().unwrap_or_default() {
                    level.push(to);
                }
                for (from, _) in in_idx.get(current).cloned().unwrap_or_default() {
                    level.push(from);
                }
            }
            level.sort();
            level.dedup();
            let mut next_frontier = Vec::new();
            for id in level {
                if visited.insert(id.clone()) {
                    result_ids.push(id.clone());
                    next_frontier.push(id);
                    if result_ids.len() >= max_nodes {
                        break;
                    }
                }
            }
            if result_ids.len() >= max_nodes || next_frontier.is_empty() {
                frontier = next_frontier;
                break;
            }
            frontier = next_frontier;
        }
        let _ = frontier;

        let mut nodes = Vec::with_capacity(result_ids.len());
        for id in result_ids {
            if let Some(n) = self.get_node(&id).await? {
                nodes.push(n);
            }
        }
        Ok(nodes)
    }

    async fn shortest_path(&self, from_id: &str, to_id: &str, max_depth: usize) -> Result<Option<GraphPath>, CoreError> {
        if self.get_node(from_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("graph node {from_id}")));
        }
        if self.get_node(to_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("graph node {to_id}")));
        }
        if from_id == to_id {
            return Ok(Some(GraphPath { node_ids: vec![from_id.to_string()], relationship_types: Vec::new(), total_strength: 0.0 }));
        }
        if max_depth == 0 {
            return Ok(None);
        }

        let (out_idx, in_idx, edges) = self.load_adjacency()?;
        let edge_lookup: HashMap<(String, String, String), &GraphRelationship> =
            edges.iter().map(|e| ((e.from_id.clone(), e.to_id.clone(), e.relationship_type.to_string()), e)).collect();

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from_id.to_string());
        let mut prev: HashMap<String, (String, String)> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((from_id.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut transitions: Vec<(String, String)> = Vec::new();
            for (to, rel) in out_idx.get(&current).cloned().unwrap_or_default() {
                transitions.push((to, rel));
            }
            for (from, rel) in in_idx.get(&current).cloned().unwrap_or_default() {
                transitions.push((from, rel));
            }
            transitions.sort();

            for (next_id, rel) in transitions {
                if visited.contains(&next_id) {
                    continue;
                }
                visited.insert(next_id.clone());
                prev.insert(next_id.clone(), (current.clone(), rel));
                if next_id == to_id {
                    let mut rev_ids = vec![to_id.to_string()];
                    let mut rev_types = Vec::new();
                    let mut total_strength = 0.0f32;
                    let mut cursor = to_id.to_string();
                    while cursor != from_id {
                        let (parent, rel) = prev.get(&cursor).expect("path reconstruction").clone();
                        let edge = edge_lookup
                            .get(&(parent.clone(), cursor.clone(), rel.clone()))
                            .or_else(|| edge_lookup.get(&(cursor.clone(), parent.clone(), rel.clone())))
                            .expect("edge indexed but missing");
                        total_strength += edge.strength;
                        rev_types.push(RelationshipType::from_str_loose(&rel));
                        cursor = parent;
                        rev_ids.push(cursor.clone());
                    }
                    rev_ids.reverse();
                    rev_types.reverse();
                    return Ok(Some(GraphPath { node_ids: rev_ids, relationship_types: rev_types, total_strength }));
                }
                queue.push_back((next_id, depth + 1));
            }
        }
        Ok(None)
    }

    async fn mentions_for_memory(&self, memory_id: &str) -> Result<Vec<Mention>, CoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, entity_id, char_start, char_end, confidence FROM memory_entity_map WHERE memory_id = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![memory_id], |row| {
                Ok(Mention {
                    memory_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    char_start: row.get::<_, i64>(2)? as usize,
                    char_end: row.get::<_, i64>(3)? as usize,
                    confidence: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    async fn edges_among(&self, node_ids: &[String]) -> Result<Vec<GraphRelationship>, CoreError> {
        let set: HashSet<&String> = node_ids.iter().collect();
        let (_, _, edges) = self.load_adjacency()?;
        Ok(edges.into_iter().filter(|e| set.contains(&e.from_id) && set.contains(&e.to_id)).collect())
    }

    async fn delete_mentions_for_memory(&self, memory_id: &str) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM memory_entity_map WHERE memory_id = ?1", rusqlite::params![memory_id])?;
            Ok(())
        })
    }

    async fn stats(&self) -> Result<GraphStats, CoreError> {
        let (node_count, edge_count) = self.with_conn(|conn| {
            let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM graph_nodes", [], |row| row.get(0))?;
            let edges: i64 = conn.query_row("SELECT COUNT(*) FROM graph_relationships", [], |row| row.get(0))?;
            Ok((nodes, edges))
        })?;
        let type_histogram = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT entity_type, COUNT(*) FROM graph_nodes GROUP BY entity_type")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?;
            rows.collect::<Result<HashMap<_, _>, _>>()
        })?;
        let mean_degree = if node_count == 0 { 0.0 } else { (2 * edge_count) as f64 / node_count as f64 };
        Ok(GraphStats { node_count: node_count as u64, edge_count: edge_count as u64, type_histogram, mean_degree })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_node_merges_and_persists_across_calls() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let a = store.upsert_node(&EntityType::Person, "ada lovelace", 0.4).await.unwrap();
        let b = store.upsert_node(&EntityType::Person, "ada lovelace", 0.7).await.unwrap();
        assert_eq!(a.id, b.id);
        assert!((b.importance_score - 0.7).abs() < 1e-6);
        assert_eq!(b.mention_count, 2);
    }

    #[tokio::test]
    async fn upsert_edge_requires_existing_nodes() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let result = store.upsert_edge("missing-a", "missing-b", &RelationshipType::RelatesTo, 0.5, 0.5).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn shortest_path_across_two_hops() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let a = store.upsert_node(&EntityType::Person, "a", 0.5).await.unwrap();
        let b = store.upsert_node(&EntityType::Person, "b", 0.5).await.unwrap();
        let c = store.upsert_node(&EntityType::Person, "c", 0.5).await.unwrap();
        store.upsert_edge(&a.id, &b.id, &RelationshipType::RelatesTo, 0.9, 0.9).await.unwrap();
        store.upsert_edge(&b.id, &c.id, &RelationshipType::RelatesTo, 0.8, 0.8).await.unwrap();

        let path = store.shortest_path(&a.id, &c.id, 5).await.unwrap().unwrap();
        assert_eq!(path.node_ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);
    }

    #[tokio::test]
    async fn mention_insert_is_idempotent() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        let node = store.upsert_node(&EntityType::Person, "ada", 0.5).await.unwrap();
        let mention = Mention { memory_id: "m1".to_string(), entity_id: node.id.clone(), char_start: 0, char_end: 3, confidence: 0.9 };
        store.insert_mention(mention.clone()).await.unwrap();
        store.insert_mention(mention).await.unwrap();
        let mentions = store.mentions_for_memory("m1").await.unwrap();
        assert_eq!(mentions.len(), 1);
    }
}
