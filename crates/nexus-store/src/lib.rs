//! `UnifiedVectorStore`: the provider-abstracted orchestration layer (§4.2).

mod config;
mod health;
mod store;

pub use config::{ReadStrategy, UnifiedVectorStoreConfig};
pub use store::{ProviderInventoryItem, QueryOutcome, UnifiedVectorStore, RECENCY_PSEUDO_EMBEDDING_VALUE};

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_scheduler::BackgroundSupervisor;
    use nexus_types::{Memory, QueryFilters};
    use std::collections::HashMap;
    use std::sync::Arc;

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

    fn test_store(providers: Vec<Arc<dyn nexus_types::VectorProvider>>) -> UnifiedVectorStore {
        let config = UnifiedVectorStoreConfig {
            primary_provider: providers[0].name().to_string(),
            embedding_dim: 2,
            ..UnifiedVectorStoreConfig::default()
        };
        UnifiedVectorStore::new(providers, config, Arc::new(BackgroundSupervisor::new())).unwrap()
    }

    #[tokio::test]
    async fn empty_query_returns_strict_recency_order() {
        let primary: Arc<dyn nexus_types::VectorProvider> = Arc::new(nexus_vec::InMemoryVectorProvider::new("primary"));
        primary.store(&mem("one", "2024-01-01T00:00:00Z", vec![0.1, 0.1])).await.unwrap();
        primary.store(&mem("two", "2024-01-02T00:00:00Z", vec![0.1, 0.1])).await.unwrap();
        primary.store(&mem("three", "2024-01-03T00:00:00Z", vec![0.1, 0.1])).await.unwrap();

        let store = test_store(vec![primary]);
        let outcome = store.get_recent(2, &QueryFilters::default()).await.unwrap();
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn add_rejects_wrong_embedding_dim() {
        let primary: Arc<dyn nexus_types::VectorProvider> = Arc::new(nexus_vec::InMemoryVectorProvider::new("primary"));
        let store = test_store(vec![primary]);
        let err = store.add(mem("a", "2024-01-01T00:00:00Z", vec![0.1, 0.1, 0.1])).await.unwrap_err();
        assert!(matches!(err, nexus_types::CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn query_fails_over_to_secondary_when_primary_is_down() {
        let primary: Arc<dyn nexus_types::VectorProvider> = Arc::new(FlakyProvider::new("primary"));
        let secondary: Arc<dyn nexus_types::VectorProvider> = Arc::new(nexus_vec::InMemoryVectorProvider::new("secondary"));
        secondary.store(&mem("x", "2024-01-01T00:00:00Z", vec![1.0, 0.0])).await.unwrap();

        let config = UnifiedVectorStoreConfig {
            primary_provider: "primary".to_string(),
            embedding_dim: 2,
            read_strategy: ReadStrategy::PrimaryThenFallback,
            ..UnifiedVectorStoreConfig::default()
        };
        let store = UnifiedVectorStore::new(vec![primary, secondary], config, Arc::new(BackgroundSupervisor::new())).unwrap();
        let outcome = store.query(&[1.0, 0.0], 5, &QueryFilters::default(), 0.0).await.unwrap();
        assert_eq!(outcome.served_by, "secondary");
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn get_fails_over_to_secondary_when_primary_is_down() {
        let primary: Arc<dyn nexus_types::VectorProvider> = Arc::new(FlakyProvider::new("primary"));
        let secondary: Arc<dyn nexus_types::VectorProvider> = Arc::new(nexus_vec::InMemoryVectorProvider::new("secondary"));
        secondary.store(&mem("x", "2024-01-01T00:00:00Z", vec![1.0, 0.0])).await.unwrap();

        let config = UnifiedVectorStoreConfig {
            primary_provider: "primary".to_string(),
            embedding_dim: 2,
            read_strategy: ReadStrategy::PrimaryThenFallback,
            ..UnifiedVectorStoreConfig::default()
        };
        let store = UnifiedVectorStore::new(vec![primary, secondary], config, Arc::new(BackgroundSupervisor::new())).unwrap();
        let found = store.get("x").await.unwrap();
        assert_eq!(found.unwrap().id, "x");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let primary: Arc<dyn nexus_types::VectorProvider> = Arc::new(nexus_vec::InMemoryVectorProvider::new("primary"));
        let store = test_store(vec![primary]);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    struct FlakyProvider {
        name: String,
    }

    impl FlakyProvider {
        fn new(name: &str) -> Self {
            Self { name: name.to_string() }
        }
    }

    #[async_trait::async_trait]
    impl nexus_types::VectorProvider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }
        async fn store(&self, _memory: &Memory) -> Result<(), nexus_types::CoreError> {
            Ok(())
        }
        async fn query(&self, _q: &[f32], _k: usize, _f: &QueryFilters) -> Result<Vec<nexus_types::ScoredMemory>, nexus_types::CoreError> {
            Err(nexus_types::CoreError::BackendUnavailable("down".to_string()))
        }
        async fn delete(&self, _id: &str) -> Result<(), nexus_types::CoreError> {
            Ok(())
        }
        async fn get(&self, _id: &str) -> Result<Option<Memory>, nexus_types::CoreError> {
            Err(nexus_types::CoreError::BackendUnavailable("down".to_string()))
        }
        async fn health_check(&self) -> nexus_types::ProviderHealth {
            nexus_types::ProviderHealth::default()
        }
        async fn get_stats(&self) -> nexus_types::ProviderStats {
            nexus_types::ProviderStats {
                item_count: 0,
                extra: HashMap::new(),
            }
        }
    }
}
