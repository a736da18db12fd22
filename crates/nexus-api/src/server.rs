//! Axum server and routes (§6).

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use nexus_service::{BatchItemOutcome, CreateMemoryInput, MemoryService};
use nexus_types::{
    AuditEvent, AuditListOptions, AuditStore, BatchItemResult, CoreError, CreateMemoriesBatchRequest, CreateMemoriesBatchResponse,
    CreateMemoryRequest, CreateMemoryResponse, ErrorResponse, GraphNodeDto, GraphQueryRequest, GraphQueryResponse, GraphRelationshipDto,
    GraphStatsResponse, GraphSyncResponse, HealthResponse, ProviderInventoryEntry, QueryFilters, QueryMemoriesRequest, QueryMemoriesResponse,
    ScoredMemoryDto,
};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

/// In-memory implementation of `AuditStore` (process lifetime only).
pub struct InMemoryAuditStore {
    events: tokio::sync::RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            events: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: AuditEvent) -> Result<(), CoreError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEvent>, CoreError> {
        let guard = self.events.read().await;
        let mut out: Vec<AuditEvent> = guard.iter().cloned().collect();
        apply_audit_list_opts(&mut out, opts);
        Ok(out)
    }
}

/// JSONL file-backed `AuditStore` (persists across restarts).
pub struct JsonlAuditStore {
    path: std::path::PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, event: AuditEvent) -> Result<(), CoreError> {
        let _guard = self.append_lock.lock().await;
        let line = serde_json::to_string(&event).map_err(|e| CoreError::StoreFailed(e.to_string()))?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CoreError::StoreFailed(e.to_string()))?;
        f.write_all(format!("{}\n", line).as_bytes()).await.map_err(|e| CoreError::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEvent>, CoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::StoreFailed(e.to_string())),
        };
        let mut out: Vec<AuditEvent> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(ev) = serde_json::from_str(line) {
                out.push(ev);
            }
        }
        apply_audit_list_opts(&mut out, opts);
        Ok(out)
    }
}

fn apply_audit_list_opts(out: &mut Vec<AuditEvent>, opts: &AuditListOptions) {
    if let Some(ref uid) = opts.user_id {
        out.retain(|e| e.user_id.as_deref() == Some(uid.as_str()));
    }
    if let Some(ref since) = opts.since {
        out.retain(|e| e.timestamp.as_str() >= since.as_str());
    }
    out.reverse();
    let offset = opts.offset.unwrap_or(0) as usize;
    let limit = opts.limit.unwrap_or(100) as usize;
    let taken: Vec<AuditEvent> = std::mem::take(out).into_iter().skip(offset).take(limit).collect();
    *out = taken;
}

pub struct AppState {
    pub service: Arc<MemoryService>,
    pub auth_token: Option<String>,
}

#[derive(Clone)]
struct RequestMeta {
    request_id: String,
}

struct ApiMetrics {
    inner: Mutex<ApiMetricsInner>,
}

impl ApiMetrics {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ApiMetricsInner {
                requests_total: HashMap::new(),
                errors_total: HashMap::new(),
                request_duration_ms: HashMap::new(),
                duration_buckets_ms: vec![5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000],
            }),
        }
    }

    fn observe(&self, endpoint: String, method: String, status: u16, duration_ms: f64) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        let req_key = RequestMetricKey {
            endpoint: endpoint.clone(),
            method: method.clone(),
            status,
        };
        *inner.requests_total.entry(req_key.clone()).or_insert(0) += 1;
        if status >= 400 {
            *inner.errors_total.entry(req_key).or_insert(0) += 1;
        }
        let lat_key = LatencyMetricKey { endpoint, method };
        let bucket_bounds = inner.duration_buckets_ms.clone();
        let entry = inner.request_duration_ms.entry(lat_key).or_insert_with(|| LatencyMetric::new(bucket_bounds.len()));
        entry.observe(duration_ms, &bucket_bounds);
    }

    fn render_prometheus(&self) -> String {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        let mut out = String::new();

        out.push_str("# HELP core_nexus_requests_total Total HTTP requests\n");
        out.push_str("# TYPE core_nexus_requests_total counter\n");
        for (k, v) in &inner.requests_total {
            out.push_str(&format!(
                "core_nexus_requests_total{{endpoint=\"{}\",method=\"{}\",status=\"{}\"}} {}\n",
                escape_label(&k.endpoint),
                escape_label(&k.method),
                k.status,
                v
            ));
        }

        out.push_str("# HELP core_nexus_errors_total Total HTTP error responses\n");
        out.push_str("# TYPE core_nexus_errors_total counter\n");
        for (k, v) in &inner.errors_total {
            out.push_str(&format!(
                "core_nexus_errors_total{{endpoint=\"{}\",method=\"{}\",status=\"{}\"}} {}\n",
                escape_label(&k.endpoint),
                escape_label(&k.method),
                k.status,
                v
            ));
        }

        out.push_str("# HELP core_nexus_request_duration_ms HTTP request latency in milliseconds\n");
        out.push_str("# TYPE core_nexus_request_duration_ms histogram\n");
        for (k, v) in &inner.request_duration_ms {
            let mut cumulative = 0u64;
            for (idx, bucket_count) in v.buckets.iter().enumerate() {
                cumulative += *bucket_count;
                out.push_str(&format!(
                    "core_nexus_request_duration_ms_bucket{{endpoint=\"{}\",method=\"{}\",le=\"{}\"}} {}\n",
                    escape_label(&k.endpoint),
                    escape_label(&k.method),
                    inner.duration_buckets_ms[idx],
                    cumulative
                ));
            }
            out.push_str(&format!(
                "core_nexus_request_duration_ms_bucket{{endpoint=\"{}\",method=\"{}\",le=\"+Inf\"}} {}\n",
                escape_label(&k.endpoint),
                escape_label(&k.method),
                v.count
            ));
            out.push_str(&format!(
                "core_nexus_request_duration_ms_sum{{endpoint=\"{}\",method=\"{}\"}} {:.6}\n",
                escape_label(&k.endpoint),
                escape_label(&k.method),
                v.sum
            ));
            out.push_str(&format!(
                "core_nexus_request_duration_ms_count{{endpoint=\"{}\",method=\"{}\"}} {}\n",
                escape_label(&k.endpoint),
                escape_label(&k.method),
                v.count
            ));
        }

        out
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct RequestMetricKey {
    endpoint: String,
    method: String,
    status: u16,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct LatencyMetricKey {
    endpoint: String,
    method: String,
}

#[derive(Clone, Debug)]
struct LatencyMetric {
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

impl LatencyMetric {
    fn new(bucket_len: usize) -> Self {
        Self {
            buckets: vec![0; bucket_len],
            count: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, duration_ms: f64, bucket_bounds: &[u64]) {
        self.count += 1;
        self.sum += duration_ms;
        for (idx, upper) in bucket_bounds.iter().enumerate() {
            if duration_ms <= *upper as f64 {
                self.buckets[idx] += 1;
                return;
            }
        }
    }
}

struct ApiMetricsInner {
    requests_total: HashMap<RequestMetricKey, u64>,
    errors_total: HashMap<RequestMetricKey, u64>,
    request_duration_ms: HashMap<LatencyMetricKey, LatencyMetric>,
    duration_buckets_ms: Vec<u64>,
}

fn escape_label(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

static METRICS: OnceLock<ApiMetrics> = OnceLock::new();

fn metrics() -> &'static ApiMetrics {
    METRICS.get_or_init(ApiMetrics::new)
}

fn error_log_sample_rate() -> f64 {
    std::env::var("CORE_NEXUS_ERROR_LOG_SAMPLE_RATE")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.1)
}

fn should_sample(request_id: &str, rate: f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    let mut h = std::collections::hash_map::DefaultHasher::new();
    request_id.hash(&mut h);
    let bucket = h.finish() % 10_000;
    bucket < (rate * 10_000.0) as u64
}

pub fn router(state: Arc<AppState>) -> Router {
    let gated_routes = Router::new()
        .route("/memories", post(handle_create_memory))
        .route("/memories/batch", post(handle_create_memories_batch))
        .route("/memories/query", post(handle_query_memories))
        .route("/memories/:id", get(handle_get_memory).delete(handle_delete_memory))
        .route("/graph/stats", get(handle_graph_stats))
        .route("/graph/query", post(handle_graph_query))
        .route("/graph/explore/:name", get(handle_graph_explore))
        .route("/graph/sync/:memory_id", post(handle_graph_sync))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_auth));

    Router::new()
        .route("/health", get(handle_health))
        .route("/providers", get(handle_providers))
        .route("/metrics", get(handle_metrics))
        .merge(gated_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestMeta { request_id: request_id.clone() });
    let mut response = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", hv);
    }
    response
}

async fn metrics_middleware(req: Request, next: Next) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let endpoint_for_log = endpoint.clone();
    let method_for_log = method.clone();
    metrics().observe(endpoint, method, status, duration_ms);
    if status >= 400 {
        let request_id = response.headers().get("x-request-id").and_then(|v| v.to_str().ok()).unwrap_or("");
        let sample_rate = error_log_sample_rate();
        if should_sample(request_id, sample_rate) {
            tracing::warn!(
                endpoint = %endpoint_for_log,
                method = %method_for_log,
                request_id = %request_id,
                status = status,
                duration_ms = duration_ms,
                sample_rate = sample_rate,
                "sampled api error"
            );
        }
    }
    response
}

async fn require_auth(State(state): State<Arc<AppState>>, headers: HeaderMap, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_ref() else {
        return next.run(request).await;
    };
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false);
    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error_code: "unauthorized".to_string(),
                message: "missing or invalid bearer token".to_string(),
                correlation_id: String::new(),
            }),
        )
            .into_response()
    }
}

/// Maps a `CoreError` to its HTTP status, with the one exception §6 calls
/// out by status code rather than error kind: oversized content surfaces as
/// 413, not the 400 `InvalidInput` otherwise maps to. Same message-sniffing
/// idiom this codebase already uses to distinguish "not supported" from a
/// generic failure.
fn core_error_response(err: CoreError, correlation_id: &str) -> Response {
    let message = err.to_string();
    let status = if matches!(&err, CoreError::InvalidInput(_)) && message.contains("too large") {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    (
        status,
        Json(ErrorResponse {
            error_code: err.error_code().to_string(),
            message,
            correlation_id: correlation_id.to_string(),
        }),
    )
        .into_response()
}

async fn handle_create_memory(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Json(req): Json<CreateMemoryRequest>,
) -> Response {
    let input = CreateMemoryInput {
        content: req.content,
        metadata: req.metadata,
        user_id: req.user_id,
        conversation_id: req.conversation_id,
    };
    match state.service.create_memory(input, &req_meta.request_id).await {
        Ok(memory) => Json(CreateMemoryResponse { memory: memory.into() }).into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_create_memories_batch(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Json(req): Json<CreateMemoriesBatchRequest>,
) -> Response {
    let inputs = req
        .items
        .into_iter()
        .map(|item| CreateMemoryInput {
            content: item.content,
            metadata: item.metadata,
            user_id: item.user_id,
            conversation_id: item.conversation_id,
        })
        .collect();
    let outcomes = state.service.create_memories_batch(inputs, &req_meta.request_id).await;
    let results = outcomes
        .into_iter()
        .map(|o| match o {
            BatchItemOutcome::Ok(memory) => BatchItemResult::Ok { memory: memory.into() },
            BatchItemOutcome::Err(e) => BatchItemResult::Err {
                error: e.to_string(),
                error_code: e.error_code().to_string(),
            },
        })
        .collect();
    Json(CreateMemoriesBatchResponse { results }).into_response()
}

async fn handle_query_memories(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Json(req): Json<QueryMemoriesRequest>,
) -> Response {
    let filters = QueryFilters {
        user_id: req.filters.user_id,
        conversation_id: req.filters.conversation_id,
        metadata: req.filters.metadata,
    };
    match state
        .service
        .query_memories(&req.text, req.clamped_limit(), filters, req.clamped_min_similarity())
        .await
    {
        Ok(result) => Json(QueryMemoriesResponse {
            results: result
                .results
                .into_iter()
                .map(|hit| ScoredMemoryDto {
                    memory: hit.memory.into(),
                    similarity: hit.similarity,
                })
                .collect(),
            served_by: result.served_by,
        })
        .into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_get_memory(State(state): State<Arc<AppState>>, Extension(req_meta): Extension<RequestMeta>, Path(id): Path<String>) -> Response {
    match state.service.get_memory(&id).await {
        Ok(Some(memory)) => Json(CreateMemoryResponse { memory: memory.into() }).into_response(),
        Ok(None) => core_error_response(CoreError::NotFound(format!("memory '{id}'")), &req_meta.request_id),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_delete_memory(State(state): State<Arc<AppState>>, Extension(req_meta): Extension<RequestMeta>, Path(id): Path<String>) -> Response {
    match state.service.delete_memory(&id, &req_meta.request_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let inventory = state.service.store().provider_inventory().await;
    let providers = inventory
        .into_iter()
        .map(|p| ProviderInventoryEntry {
            name: p.name,
            is_primary: p.is_primary,
            health: p.health,
        })
        .collect();
    Json(HealthResponse {
        status: "ok",
        providers,
        graph_enabled: state.service.graph().is_enabled(),
    })
    .into_response()
}

async fn handle_providers(State(state): State<Arc<AppState>>) -> Response {
    let inventory = state.service.store().provider_inventory().await;
    let providers: Vec<ProviderInventoryEntry> = inventory
        .into_iter()
        .map(|p| ProviderInventoryEntry {
            name: p.name,
            is_primary: p.is_primary,
            health: p.health,
        })
        .collect();
    Json(providers).into_response()
}

async fn handle_graph_stats(State(state): State<Arc<AppState>>, Extension(req_meta): Extension<RequestMeta>) -> Response {
    match state.service.graph().stats().await {
        Ok(stats) => Json(GraphStatsResponse {
            node_count: stats.node_count,
            edge_count: stats.edge_count,
            type_histogram: stats.type_histogram,
            mean_degree: stats.mean_degree,
        })
        .into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_graph_query(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Json(req): Json<GraphQueryRequest>,
) -> Response {
    let graph = state.service.graph();
    let result = match req {
        GraphQueryRequest::Explore { entity_name, depth, max_nodes } => graph
            .explore(&entity_name, depth as usize, max_nodes as usize)
            .await
            .map(|(nodes, edges)| GraphQueryResponse::Explore {
                nodes: nodes.into_iter().map(GraphNodeDto::from).collect(),
                edges: edges.into_iter().map(GraphRelationshipDto::from).collect(),
            }),
        GraphQueryRequest::Path { from_name, to_name, max_depth } => {
            graph.path(&from_name, &to_name, max_depth as usize).await.and_then(|found| {
                found
                    .map(|p| GraphQueryResponse::Path {
                        node_ids: p.node_ids,
                        relationship_types: p.relationship_types.iter().map(|r| r.to_string()).collect(),
                        total_strength: p.total_strength,
                    })
                    .ok_or_else(|| CoreError::NotFound(format!("no path between '{from_name}' and '{to_name}'")))
            })
        }
        GraphQueryRequest::Insights { memory_id } => graph.insights(&memory_id).await.map(|(nodes, edges)| GraphQueryResponse::Insights {
            entities: nodes.into_iter().map(GraphNodeDto::from).collect(),
            edges: edges.into_iter().map(GraphRelationshipDto::from).collect(),
        }),
    };
    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct ExploreQuery {
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,
}

fn default_depth() -> u32 {
    1
}
fn default_max_nodes() -> u32 {
    100
}

async fn handle_graph_explore(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Path(name): Path<String>,
    axum::extract::Query(q): axum::extract::Query<ExploreQuery>,
) -> Response {
    match state.service.graph().explore(&name, q.depth as usize, q.max_nodes as usize).await {
        Ok((nodes, edges)) => Json(GraphQueryResponse::Explore {
            nodes: nodes.into_iter().map(GraphNodeDto::from).collect(),
            edges: edges.into_iter().map(GraphRelationshipDto::from).collect(),
        })
        .into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_graph_sync(
    State(state): State<Arc<AppState>>,
    Extension(req_meta): Extension<RequestMeta>,
    Path(memory_id): Path<String>,
) -> Response {
    match state.service.sync_memory(&memory_id, &req_meta.request_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(GraphSyncResponse { accepted: true, memory_id }),
        )
            .into_response(),
        Err(e) => core_error_response(e, &req_meta.request_id),
    }
}

async fn handle_metrics() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4".to_string())], metrics().render_prometheus()).into_response()
}
