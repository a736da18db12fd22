//! Core Nexus REST API server: `/memories`, `/memories/query`, `/graph/*`, `/health`, `/metrics`.

use nexus_api::server;
use nexus_embed::{CompositeExtractor, LlmEntityExtractor, OpenAiEmbedder, RegexEntityExtractor};
use nexus_graph::{GraphProvider, GraphProviderConfig, InMemoryGraphStore, SqliteGraphStore};
use nexus_scheduler::BackgroundSupervisor;
use nexus_scoring::{AdmScorer, AdmThresholds, AdmWeights};
use nexus_service::{MemoryService, ServiceConfig};
use nexus_store::{UnifiedVectorStore, UnifiedVectorStoreConfig};
use nexus_types::{EntityExtractor, GraphStore, VectorProvider};
use nexus_vec::InMemoryVectorProvider;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parses `CORE_NEXUS_ADM_WEIGHTS=w_q,w_r,w_i`; falls back to the documented
/// default profile on anything unset or malformed.
fn adm_weights_from_env() -> AdmWeights {
    let Ok(raw) = std::env::var("CORE_NEXUS_ADM_WEIGHTS") else {
        return AdmWeights::default();
    };
    let parts: Vec<f32> = raw.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    match parts.as_slice() {
        [w_quality, w_relevance, w_intelligence] => AdmWeights {
            w_quality: *w_quality,
            w_relevance: *w_relevance,
            w_intelligence: *w_intelligence,
        },
        _ => {
            tracing::warn!(raw = %raw, "CORE_NEXUS_ADM_WEIGHTS malformed, using defaults");
            AdmWeights::default()
        }
    }
}

async fn build_vector_providers(dim: usize) -> Result<(Vec<Arc<dyn VectorProvider>>, String), Box<dyn std::error::Error + Send + Sync>> {
    let mut providers: Vec<Arc<dyn VectorProvider>> = Vec::new();
    let primary_name;

    if let Ok(url) = std::env::var("CORE_NEXUS_PG_URL") {
        let table = std::env::var("CORE_NEXUS_PG_TABLE").unwrap_or_else(|_| "memories".to_string());
        let provider = nexus_vec::PgvectorProvider::new("pgvector", &url, table, dim).await?;
        tracing::info!("primary vector provider: pgvector");
        primary_name = "pgvector".to_string();
        providers.push(Arc::new(provider));
    } else {
        tracing::info!("primary vector provider: in-memory (set CORE_NEXUS_PG_URL for pgvector)");
        primary_name = "memory".to_string();
        providers.push(Arc::new(InMemoryVectorProvider::new("memory")));
    }

    if let Ok(url) = std::env::var("CORE_NEXUS_QDRANT_URL") {
        let collection = std::env::var("CORE_NEXUS_QDRANT_COLLECTION").ok();
        let provider = nexus_vec::QdrantProvider::new("qdrant", &url, collection.as_deref(), dim)?;
        tracing::info!("mirror vector provider: qdrant at {}", url);
        providers.push(Arc::new(provider));
    }

    Ok((providers, primary_name))
}

fn build_extractor() -> Arc<dyn EntityExtractor> {
    let regex: Box<dyn EntityExtractor> = Box::new(RegexEntityExtractor::default());
    match LlmEntityExtractor::from_env() {
        Some(llm) => {
            tracing::info!("entity extraction: LLM-backed extractor composed with the regex fallback");
            Arc::new(CompositeExtractor::new(vec![Box::new(llm), regex]))
        }
        None => {
            tracing::info!("entity extraction: regex fallback only (set NER_API_KEY for LLM extraction)");
            Arc::new(CompositeExtractor::new(vec![regex]))
        }
    }
}

fn build_graph_store() -> Result<Arc<dyn GraphStore>, Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(path) = std::env::var("CORE_NEXUS_GRAPH_SQLITE_PATH") {
        tracing::info!("graph store: sqlite at {}", path);
        return Ok(Arc::new(SqliteGraphStore::new(&path)?));
    }
    tracing::info!("graph store: in-memory (set CORE_NEXUS_GRAPH_SQLITE_PATH for persistence)");
    Ok(Arc::new(InMemoryGraphStore::new()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store_config = UnifiedVectorStoreConfig::from_env();
    let (providers, discovered_primary) = build_vector_providers(store_config.embedding_dim).await?;
    let store_config = UnifiedVectorStoreConfig {
        primary_provider: if std::env::var("CORE_NEXUS_PRIMARY_PROVIDER").is_ok() {
            store_config.primary_provider
        } else {
            discovered_primary
        },
        ..store_config
    };

    let supervisor = Arc::new(BackgroundSupervisor::new());
    let store = Arc::new(UnifiedVectorStore::new(providers, store_config, Arc::clone(&supervisor))?);
    Arc::clone(&store).spawn_health_probe_loop(Duration::from_secs(30));

    let scorer = Arc::new(AdmScorer::new(adm_weights_from_env(), AdmThresholds::default()));

    let graph_enabled = std::env::var("CORE_NEXUS_GRAPH_ENABLED").ok().and_then(|v| v.parse().ok()).unwrap_or(true);
    let graph_store = build_graph_store()?;
    let extractor = build_extractor();
    let graph = Arc::new(GraphProvider::new(graph_store, extractor, Arc::clone(&scorer), GraphProviderConfig::default(), graph_enabled));

    let embedder = Arc::new(OpenAiEmbedder::from_env());

    let audit: Arc<dyn nexus_types::AuditStore> = if let Ok(path) = std::env::var("CORE_NEXUS_AUDIT_LOG_PATH") {
        tracing::info!("audit log: JSONL at {}", path);
        Arc::new(server::JsonlAuditStore::new(path))
    } else {
        tracing::info!("audit log: in-memory (set CORE_NEXUS_AUDIT_LOG_PATH for persistence)");
        Arc::new(server::InMemoryAuditStore::new())
    };

    let service = Arc::new(MemoryService::new(
        Arc::clone(&store),
        scorer,
        embedder,
        graph,
        supervisor,
        audit,
        ServiceConfig::from_env(),
    ));

    let auth_token = std::env::var("CORE_NEXUS_AUTH_TOKEN").ok();
    let state = Arc::new(server::AppState { service, auth_token });

    let app = server::router(state);
    let addr: SocketAddr = std::env::var("CORE_NEXUS_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string()).parse()?;
    tracing::info!("Core Nexus API listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app.into_make_service()).await?;
    Ok(())
}
