//! In-memory vector provider (brute-force KNN). Used for tests and local
//! development; also the natural reference implementation of `get_recent`.

use nexus_types::{CoreError, Memory, ProviderHealth, ProviderStats, QueryFilters, ScoredMemory, VectorProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    ((dot / (na * nb)) as f32).clamp(-1.0, 1.0)
}

fn matches_filters(m: &Memory, filters: &QueryFilters) -> bool {
    if let Some(ref uid) = filters.user_id {
        if m.user_id.as_deref() != Some(uid.as_str()) {
            return false;
        }
    }
    if let Some(ref cid) = filters.conversation_id {
        if m.conversation_id.as_deref() != Some(cid.as_str()) {
            return false;
        }
    }
    for (k, v) in filters.metadata.iter() {
        if m.metadata.get(k) != Some(v) {
            return false;
        }
    }
    true
}

/// In-memory `VectorProvider`: stores memories in a map, guarded by a single
/// `RwLock`. Brute-force cosine scan; `get_recent` is served natively via a
/// sort on `created_at` rather than a synthetic-vector `query`.
pub struct InMemoryVectorProvider {
    name: String,
    store: Arc<RwLock<HashMap<String, Memory>>>,
}

impl InMemoryVectorProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait::async_trait]
impl VectorProvider for InMemoryVectorProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, memory: &Memory) -> Result<(), CoreError> {
        self.store.write().await.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn query(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredMemory>, CoreError> {
        let guard = self.store.read().await;
        let mut candidates: Vec<ScoredMemory> = guard
            .values()
            .filter(|m| matches_filters(m, filters))
            .map(|m| ScoredMemory {
                memory: m.clone(),
                similarity: cosine_similarity(query_embedding, &m.embedding).max(0.0),
            })
            .collect();
        candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn delete(&self, memory_id: &str) -> Result<(), CoreError> {
        let mut guard = self.store.write().await;
        if guard.remove(memory_id).is_none() {
            return Err(CoreError::NotFound(memory_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, memory_id: &str) -> Result<Option<Memory>, CoreError> {
        Ok(self.store.read().await.get(memory_id).cloned())
    }

    async fn health_check(&self) -> ProviderHealth {
        let item_count = self.store.read().await.len() as u64;
        ProviderHealth {
            item_count: Some(item_count),
            last_ok: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    async fn get_stats(&self) -> ProviderStats {
        ProviderStats {
            item_count: self.store.read().await.len() as u64,
            extra: HashMap::new(),
        }
    }

    fn supports_get_recent(&self) -> bool {
        true
    }

    async fn get_recent(&self, k: usize, filters: &QueryFilters) -> Result<Vec<ScoredMemory>, CoreError> {
        let guard = self.store.read().await;
        let mut items: Vec<Memory> = guard
            .values()
            .filter(|m| matches_filters(m, filters))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(k);
        Ok(items
            .into_iter()
            .map(|memory| ScoredMemory { memory, similarity: 1.0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(id: &str, created_at: &str, embedding: Vec<f32>) -> Memory {
        Memory {
            id: id.to_string(),
            content: format!("content-{id}"),
            embedding,
            metadata: HashMap::new(),
            importance_score: 0.5,
            user_id: None,
            conversation_id: None,
            created_at: created_at.to_string(),
            last_accessed: created_at.to_string(),
            access_count: 0,
        }
    }

    #[tokio::test]
    async fn get_recent_orders_by_created_at_desc() {
        let provider = InMemoryVectorProvider::new("mem");
        provider.store(&mem("a", "2024-01-01T00:00:00Z", vec![0.0; 3])).await.unwrap();
        provider.store(&mem("b", "2024-01-02T00:00:00Z", vec![0.0; 3])).await.unwrap();
        provider.store(&mem("c", "2024-01-03T00:00:00Z", vec![0.0; 3])).await.unwrap();

        let recent = provider.get_recent(2, &QueryFilters::default()).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|s| s.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn query_orders_by_similarity_desc_and_clamps() {
        let provider = InMemoryVectorProvider::new("mem");
        provider.store(&mem("a", "2024-01-01T00:00:00Z", vec![1.0, 0.0])).await.unwrap();
        provider.store(&mem("b", "2024-01-01T00:00:00Z", vec![0.0, 1.0])).await.unwrap();

        let hits = provider.query(&[1.0, 0.0], 2, &QueryFilters::default()).await.unwrap();
        assert_eq!(hits[0].memory.id, "a");
        assert!(hits[0].similarity > hits[1].similarity);
        for h in &hits {
            assert!((0.0..=1.0).contains(&h.similarity));
        }
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let provider = InMemoryVectorProvider::new("mem");
        let err = provider.delete("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_and_some_after_store() {
        let provider = InMemoryVectorProvider::new("mem");
        assert!(provider.get("a").await.unwrap().is_none());
        provider.store(&mem("a", "2024-01-01T00:00:00Z", vec![0.0; 3])).await.unwrap();
        let found = provider.get("a").await.unwrap().unwrap();
        assert_eq!(found.id, "a");
    }
}
