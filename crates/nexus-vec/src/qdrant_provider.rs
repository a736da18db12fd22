//! Qdrant-backed mirror vector provider (requires feature "qdrant").
//!
//! Stands in for the Chroma/Pinecone-class secondary mirror named in the
//! component diagram: a remote vector database reached over gRPC, used
//! best-effort and never on the fail-loud write path.

use nexus_types::{CoreError, Memory, ProviderHealth, ProviderHealthState, ProviderStats, QueryFilters, ScoredMemory, VectorProvider};
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, GetPointsBuilder, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Payload;
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_COLLECTION: &str = "core_nexus_memories";

pub struct QdrantProvider {
    name: String,
    client: Arc<Qdrant>,
    collection: String,
    dim: u64,
}

impl QdrantProvider {
    pub fn new(name: impl Into<String>, url: &str, collection: Option<&str>, dim: usize) -> Result<Self, CoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            client: Arc::new(client),
            collection: collection.unwrap_or(DEFAULT_COLLECTION).to_string(),
            dim: dim as u64,
        })
    }

    /// Lazy collection creation: never runs during construction so an
    /// unreachable mirror can't block service startup.
    async fn ensure_collection(&self) -> Result<(), CoreError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(self.dim, qdrant_client::qdrant::Distance::Cosine)),
                )
                .await
                .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    fn memory_to_point(memory: &Memory) -> PointStruct {
        let mut payload_map = memory.metadata.clone();
        payload_map.insert("content".to_string(), serde_json::Value::String(memory.content.clone()));
        payload_map.insert(
            "importance_score".to_string(),
            serde_json::json!(memory.importance_score),
        );
        payload_map.insert("created_at".to_string(), serde_json::json!(memory.created_at));
        payload_map.insert("last_accessed".to_string(), serde_json::json!(memory.last_accessed));
        payload_map.insert("access_count".to_string(), serde_json::json!(memory.access_count));
        if let Some(ref uid) = memory.user_id {
            payload_map.insert("user_id".to_string(), serde_json::json!(uid));
        }
        if let Some(ref cid) = memory.conversation_id {
            payload_map.insert("conversation_id".to_string(), serde_json::json!(cid));
        }
        let payload_json = serde_json::Value::Object(payload_map.into_iter().collect());
        let payload = Payload::try_from(payload_json).unwrap_or_default();
        PointStruct::new(memory.id.as_str(), memory.embedding.clone(), payload)
    }
}

#[async_trait::async_trait]
impl VectorProvider for QdrantProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, memory: &Memory) -> Result<(), CoreError> {
        if memory.embedding.len() as u64 != self.dim {
            return Err(CoreError::InvalidInput(format!(
                "embedding dim {} != configured {}",
                memory.embedding.len(),
                self.dim
            )));
        }
        self.ensure_collection().await?;
        let point = Self::memory_to_point(memory);
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), vec![point]).wait(true))
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        query_embedding: &[f32],
        k: usize,
        _filters: &QueryFilters,
    ) -> Result<Vec<ScoredMemory>, CoreError> {
        let result = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.clone(), query_embedding.to_vec(), k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        Ok(result
            .result
            .into_iter()
            .filter_map(|p| {
                let id = p.id.as_ref().and_then(|id| {
                    id.point_id_options.as_ref().map(|o| match o {
                        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u.clone(),
                        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
                    })
                })?;
                let content = payload_string(&p.payload, "content").unwrap_or_default();
                let importance_score = payload_f64(&p.payload, "importance_score").unwrap_or(0.0) as f32;
                let created_at = payload_string(&p.payload, "created_at").unwrap_or_default();
                let last_accessed = payload_string(&p.payload, "last_accessed").unwrap_or_else(|| created_at.clone());
                let access_count = payload_f64(&p.payload, "access_count").unwrap_or(0.0) as u64;
                let user_id = payload_string(&p.payload, "user_id");
                let conversation_id = payload_string(&p.payload, "conversation_id");
                let memory = Memory {
                    id,
                    content,
                    embedding: Vec::new(),
                    metadata: HashMap::new(),
                    importance_score,
                    user_id,
                    conversation_id,
                    created_at,
                    last_accessed,
                    access_count,
                };
                Some(ScoredMemory {
                    memory,
                    similarity: (p.score as f32).clamp(0.0, 1.0),
                })
            })
            .collect())
    }

    async fn delete(&self, memory_id: &str) -> Result<(), CoreError> {
        let point_id = qdrant_client::qdrant::PointId::from(memory_id);
        self.client
            .delete_points(DeletePointsBuilder::new(self.collection.clone()).points(vec![point_id]))
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, memory_id: &str) -> Result<Option<Memory>, CoreError> {
        let point_id = qdrant_client::qdrant::PointId::from(memory_id);
        let result = self
            .client
            .get_points(
                GetPointsBuilder::new(self.collection.clone(), vec![point_id])
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        Ok(result.result.into_iter().next().map(|p| {
            let content = payload_string(&p.payload, "content").unwrap_or_default();
            let importance_score = payload_f64(&p.payload, "importance_score").unwrap_or(0.0) as f32;
            let created_at = payload_string(&p.payload, "created_at").unwrap_or_default();
            let last_accessed = payload_string(&p.payload, "last_accessed").unwrap_or_else(|| created_at.clone());
            let access_count = payload_f64(&p.payload, "access_count").unwrap_or(0.0) as u64;
            let user_id = payload_string(&p.payload, "user_id");
            let conversation_id = payload_string(&p.payload, "conversation_id");
            Memory {
                id: memory_id.to_string(),
                content,
                embedding: Vec::new(),
                metadata: HashMap::new(),
                importance_score,
                user_id,
                conversation_id,
                created_at,
                last_accessed,
                access_count,
            }
        }))
    }

    async fn health_check(&self) -> ProviderHealth {
        match self.client.collection_exists(&self.collection).await {
            Ok(_) => ProviderHealth {
                state: ProviderHealthState::Healthy,
                last_ok: Some(chrono::Utc::now().to_rfc3339()),
                ..Default::default()
            },
            Err(_) => ProviderHealth {
                state: ProviderHealthState::Down,
                consecutive_failures: 1,
                ..Default::default()
            },
        }
    }

    async fn get_stats(&self) -> ProviderStats {
        let item_count = self
            .client
            .collection_info(self.collection.clone())
            .await
            .ok()
            .and_then(|r| r.result)
            .map(|r| r.points_count.unwrap_or(0))
            .unwrap_or(0);
        ProviderStats {
            item_count,
            extra: HashMap::new(),
        }
    }
}

fn payload_string(payload: &HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match v.kind.as_ref() {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn payload_f64(payload: &HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> Option<f64> {
    payload.get(key).and_then(|v| match v.kind.as_ref() {
        Some(qdrant_client::qdrant::value::Kind::DoubleValue(f)) => Some(*f),
        Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)) => Some(*i as f64),
        _ => None,
    })
}
