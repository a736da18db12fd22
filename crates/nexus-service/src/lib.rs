//! `MemoryService`: orchestrates `UnifiedVectorStore`, `AdmScorer`, and
//! `GraphProvider` into the lifecycle operations of §4.5.

mod config;
mod facade;

pub use config::ServiceConfig;
pub use facade::{BatchItemOutcome, CreateMemoryInput, MemoryService, QueryResult, MAX_CONTENT_BYTES};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nexus_embed::MockEmbedder;
    use nexus_embed::RegexEntityExtractor;
    use nexus_graph::{GraphProvider, GraphProviderConfig, InMemoryGraphStore};
    use nexus_scheduler::BackgroundSupervisor;
    use nexus_scoring::AdmScorer;
    use nexus_store::{UnifiedVectorStore, UnifiedVectorStoreConfig};
    use nexus_types::{AuditEvent, AuditListOptions, AuditStore, CoreError, QueryFilters};
    use nexus_vec::InMemoryVectorProvider;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    struct TestAuditStore {
        events: RwLock<Vec<AuditEvent>>,
    }

    impl TestAuditStore {
        fn new() -> Self {
            Self { events: RwLock::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl AuditStore for TestAuditStore {
        async fn append(&self, event: AuditEvent) -> Result<(), CoreError> {
            self.events.write().await.push(event);
            Ok(())
        }

        async fn list(&self, _opts: &AuditListOptions) -> Result<Vec<AuditEvent>, CoreError> {
            Ok(self.events.read().await.clone())
        }
    }

    fn test_service() -> MemoryService {
        let provider: Arc<dyn nexus_types::VectorProvider> = Arc::new(InMemoryVectorProvider::new("mem"));
        let store_config = UnifiedVectorStoreConfig {
            primary_provider: "mem".to_string(),
            embedding_dim: nexus_types::EMBEDDING_DIM,
            ..UnifiedVectorStoreConfig::default()
        };
        let supervisor = Arc::new(BackgroundSupervisor::new());
        let store = Arc::new(UnifiedVectorStore::new(vec![provider], store_config, Arc::clone(&supervisor)).unwrap());
        let scorer = Arc::new(AdmScorer::default());
        let graph_store: Arc<dyn nexus_types::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let extractor: Arc<dyn nexus_types::EntityExtractor> = Arc::new(RegexEntityExtractor::default());
        let graph = Arc::new(GraphProvider::new(graph_store, extractor, Arc::clone(&scorer), GraphProviderConfig::default(), true));
        let audit: Arc<dyn AuditStore> = Arc::new(TestAuditStore::new());
        MemoryService::new(store, scorer, Arc::new(MockEmbedder::new()), graph, supervisor, audit, ServiceConfig::default())
    }

    fn input(content: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            content: content.to_string(),
            metadata: Default::default(),
            user_id: None,
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_content() {
        let service = test_service();
        let stored = service.create_memory(input("Alice works at Acme."), "corr-1").await.unwrap();
        assert_eq!(stored.embedding.len(), nexus_types::EMBEDDING_DIM);
        assert!((0.0..=1.0).contains(&stored.importance_score));

        let fetched = service.get_memory(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "Alice works at Acme.");
        assert_eq!(fetched.id, stored.id);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let service = test_service();
        let err = service.create_memory(input("   "), "corr-1").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let service = test_service();
        let big = "x".repeat(MAX_CONTENT_BYTES + 1);
        let err = service.create_memory(input(&big), "corr-1").await.unwrap_err();
        match err {
            CoreError::InvalidInput(msg) => assert!(msg.contains("too large")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_query_returns_strict_recency_order() {
        let service = test_service();
        service.create_memory(input("one"), "c1").await.unwrap();
        service.create_memory(input("two"), "c1").await.unwrap();
        service.create_memory(input("three"), "c1").await.unwrap();

        let result = service.query_memories("", 2, QueryFilters::default(), 0.0).await.unwrap();
        let contents: Vec<&str> = result.results.iter().map(|r| r.memory.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let service = test_service();
        let stored = service.create_memory(input("to be deleted"), "c1").await.unwrap();
        service.delete_memory(&stored.id, "c1").await.unwrap();
        assert!(service.get_memory(&stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_memory_is_not_found() {
        let service = test_service();
        let err = service.delete_memory("missing", "c1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn sync_unknown_memory_is_not_found() {
        let service = test_service();
        let err = service.sync_memory("missing", "c1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn batch_create_isolates_per_item_failures() {
        let service = test_service();
        let items = vec![input("good one"), input(""), input("good two")];
        let results = service.create_memories_batch(items, "c1").await;
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], BatchItemOutcome::Ok(_)));
        assert!(matches!(results[1], BatchItemOutcome::Err(CoreError::InvalidInput(_))));
        assert!(matches!(results[2], BatchItemOutcome::Ok(_)));
    }
}
