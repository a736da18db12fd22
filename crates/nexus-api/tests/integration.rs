//! Integration tests against the Axum router: create, query, get, delete,
//! graph sync and explore, health, auth gating.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use nexus_api::server::{self, AppState, InMemoryAuditStore};
use nexus_embed::{MockEmbedder, RegexEntityExtractor};
use nexus_graph::{GraphProvider, GraphProviderConfig, InMemoryGraphStore};
use nexus_scheduler::BackgroundSupervisor;
use nexus_scoring::AdmScorer;
use nexus_service::{MemoryService, ServiceConfig};
use nexus_store::{UnifiedVectorStore, UnifiedVectorStoreConfig};
use nexus_types::{AuditStore, EntityExtractor, GraphStore, VectorProvider};
use nexus_vec::InMemoryVectorProvider;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

fn test_app(auth_token: Option<String>) -> axum::Router {
    let provider: Arc<dyn VectorProvider> = Arc::new(InMemoryVectorProvider::new("mem"));
    let store_config = UnifiedVectorStoreConfig {
        primary_provider: "mem".to_string(),
        embedding_dim: nexus_types::EMBEDDING_DIM,
        ..UnifiedVectorStoreConfig::default()
    };
    let supervisor = Arc::new(BackgroundSupervisor::new());
    let store = Arc::new(UnifiedVectorStore::new(vec![provider], store_config, Arc::clone(&supervisor)).unwrap());
    let scorer = Arc::new(AdmScorer::default());
    let graph_store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let extractor: Arc<dyn EntityExtractor> = Arc::new(RegexEntityExtractor::default());
    let graph = Arc::new(GraphProvider::new(graph_store, extractor, Arc::clone(&scorer), GraphProviderConfig::default(), true));
    let audit: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
    let service = Arc::new(MemoryService::new(store, scorer, Arc::new(MockEmbedder::new()), graph, supervisor, audit, ServiceConfig::default()));
    server::router(Arc::new(AppState { service, auth_token }))
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_then_get_memory() {
    let app = test_app(None);
    let req = post("/memories", json!({ "content": "Alice works at Acme." }));
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let j = body_json(res).await;
    let id = j["memory"]["id"].as_str().unwrap().to_string();
    assert_eq!(j["memory"]["content"], "Alice works at Acme.");

    let req = get(&format!("/memories/{id}"));
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let j = body_json(res).await;
    assert_eq!(j["memory"]["id"], id);
}

#[tokio::test]
async fn create_with_empty_content_is_400() {
    let app = test_app(None);
    let req = post("/memories", json!({ "content": "   " }));
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_content_is_413() {
    let app = test_app(None);
    let big = "x".repeat(nexus_service::MAX_CONTENT_BYTES + 1);
    let req = post("/memories", json!({ "content": big }));
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn get_missing_memory_is_404() {
    let app = test_app(None);
    let req = get("/memories/does-not-exist");
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_query_returns_recency_order() {
    let app = test_app(None);
    for content in ["one", "two", "three"] {
        let req = post("/memories", json!({ "content": content }));
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    let req = post("/memories/query", json!({ "text": "", "limit": 2 }));
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let j = body_json(res).await;
    let contents: Vec<&str> = j["results"].as_array().unwrap().iter().map(|r| r["memory"]["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["three", "two"]);
}

#[tokio::test]
async fn delete_then_get_is_404() {
    let app = test_app(None);
    let req = post("/memories", json!({ "content": "to be deleted" }));
    let j = body_json(app.clone().oneshot(req).await.unwrap()).await;
    let id = j["memory"]["id"].as_str().unwrap().to_string();

    let req = Request::builder().method("DELETE").uri(format!("/memories/{id}")).body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let req = get(&format!("/memories/{id}"));
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn graph_explore_builds_nodes_from_ingested_memory() {
    let app = test_app(None);
    let req = post("/memories", json!({ "content": "Alice works for Acme." }));
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let req = get("/graph/explore/Alice?depth=1");
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let j = body_json(res).await;
    let names: Vec<&str> = j["nodes"].as_array().unwrap().iter().map(|n| n["entity_name"].as_str().unwrap()).collect();
    assert!(names.iter().any(|n| n.eq_ignore_ascii_case("alice")));
}

#[tokio::test]
async fn graph_disabled_isolation() {
    let provider: Arc<dyn VectorProvider> = Arc::new(InMemoryVectorProvider::new("mem"));
    let store_config = UnifiedVectorStoreConfig {
        primary_provider: "mem".to_string(),
        embedding_dim: nexus_types::EMBEDDING_DIM,
        ..UnifiedVectorStoreConfig::default()
    };
    let supervisor = Arc::new(BackgroundSupervisor::new());
    let store = Arc::new(UnifiedVectorStore::new(vec![provider], store_config, Arc::clone(&supervisor)).unwrap());
    let scorer = Arc::new(AdmScorer::default());
    let graph_store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
    let extractor: Arc<dyn EntityExtractor> = Arc::new(RegexEntityExtractor::default());
    let graph = Arc::new(GraphProvider::new(graph_store, extractor, Arc::clone(&scorer), GraphProviderConfig::default(), false));
    let audit: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
    let service = Arc::new(MemoryService::new(store, scorer, Arc::new(MockEmbedder::new()), graph, supervisor, audit, ServiceConfig::default()));
    let app = server::router(Arc::new(AppState { service, auth_token: None }));

    let req = post("/memories", json!({ "content": "Alice works for Acme." }));
    assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

    let req = get("/graph/stats");
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn auth_gate_rejects_missing_bearer_token_on_memories_routes() {
    let app = test_app(Some("s3cr3t".to_string()));

    let req = post("/memories", json!({ "content": "gated" }));
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let req = Request::builder()
        .method("POST")
        .uri("/memories")
        .header("content-type", "application/json")
        .header("authorization", "Bearer s3cr3t")
        .body(Body::from(json!({ "content": "gated" }).to_string()))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_providers_and_graph_enabled() {
    let app = test_app(None);
    let req = get("/health");
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let j = body_json(res).await;
    assert_eq!(j["status"], "ok");
    assert_eq!(j["graph_enabled"], true);
    assert!(j["providers"].as_array().unwrap().iter().any(|p| p["name"] == "mem"));
}
