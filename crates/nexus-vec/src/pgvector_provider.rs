//! Pgvector-backed primary vector provider (requires feature "pgvector").
//!
//! Relational storage with a `vector(D)` column and an HNSW index under
//! cosine ops, reached through a bounded `deadpool-postgres` connection
//! pool. This is the primary backend named in §4.1: filters are predicate
//! pushdowns against scalar columns and a `metadata` JSONB containment
//! check; anything it can't push down is left to the orchestrator's
//! post-filter.

use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use nexus_types::{CoreError, Memory, ProviderHealth, ProviderHealthState, ProviderStats, QueryFilters, ScoredMemory, VectorProvider};
use std::collections::HashMap;
use std::time::Instant;
use tokio_postgres::NoTls;

/// First HNSW build attempt: generous parameters for recall.
const HNSW_M_PRIMARY: u32 = 16;
const HNSW_EF_CONSTRUCTION_PRIMARY: u32 = 64;
/// Fallback step-down when the server rejects the primary build for lack of
/// `maintenance_work_mem`. One fixed step-down, then give up (§9 open
/// question, resolved this way and documented in DESIGN.md).
const HNSW_M_FALLBACK: u32 = 8;
const HNSW_EF_CONSTRUCTION_FALLBACK: u32 = 32;

pub struct PgvectorProvider {
    name: String,
    pool: Pool,
    table: String,
    dim: usize,
}

fn pool_error(e: impl std::fmt::Display) -> CoreError {
    CoreError::BackendUnavailable(format!("pgvector pool: {e}"))
}

fn query_error(op: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::BackendUnavailable(format!("pgvector {op}: {e}"))
}

fn format_embedding(embedding: &[f32]) -> String {
    let mut s = String::with_capacity(embedding.len() * 8 + 2);
    s.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&v.to_string());
    }
    s.push(']');
    s
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl PgvectorProvider {
    /// Builds the pool and runs schema/index setup eagerly, matching the
    /// capability contract in §4.1 (unlike the graph backend, the vector
    /// primary is on the request path from the first write, so there is no
    /// benefit to deferring pool construction).
    pub async fn new(name: impl Into<String>, connection_url: &str, table: impl Into<String>, dim: usize) -> Result<Self, CoreError> {
        let pg_config: tokio_postgres::Config = connection_url
            .parse()
            .map_err(|e| CoreError::InvalidInput(format!("invalid postgres url: {e}")))?;
        let mut cfg = Config::new();
        cfg.host = pg_config.get_hosts().first().map(host_to_string);
        cfg.port = pg_config.get_ports().first().copied();
        cfg.user = pg_config.get_user().map(String::from);
        cfg.password = pg_config.get_password().map(|p| String::from_utf8_lossy(p).to_string());
        cfg.dbname = pg_config.get_dbname().map(String::from);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CoreError::BackendUnavailable(format!("pgvector create_pool: {e}")))?;

        let provider = Self {
            name: name.into(),
            pool,
            table: table.into(),
            dim,
        };
        provider.ensure_schema().await?;
        Ok(provider)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector;")
            .await
            .map_err(|e| query_error("create_extension", e))?;
        client
            .batch_execute(&format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    embedding vector({dim}) NOT NULL,
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    importance_score REAL NOT NULL DEFAULT 0,
                    user_id TEXT,
                    conversation_id TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    last_accessed TIMESTAMPTZ NOT NULL DEFAULT now(),
                    access_count BIGINT NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS {table}_metadata_gin ON {table} USING gin (metadata);
                CREATE INDEX IF NOT EXISTS {table}_created_at ON {table} (created_at DESC);"#,
                table = self.table,
                dim = self.dim,
            ))
            .await
            .map_err(|e| query_error("create_table", e))?;
        self.ensure_hnsw_index(&client).await
    }

    async fn ensure_hnsw_index(&self, client: &deadpool_postgres::Client) -> Result<(), CoreError> {
        let index_name = format!("{}_embedding_hnsw", self.table);
        let try_build = |m: u32, ef: u32| {
            format!(
                "CREATE INDEX IF NOT EXISTS {index_name} ON {table} USING hnsw (embedding vector_cosine_ops) WITH (m = {m}, ef_construction = {ef});",
                index_name = index_name,
                table = self.table,
                m = m,
                ef = ef,
            )
        };
        if client.batch_execute(&try_build(HNSW_M_PRIMARY, HNSW_EF_CONSTRUCTION_PRIMARY)).await.is_ok() {
            return Ok(());
        }
        tracing::warn!(table = %self.table, "hnsw build at m={HNSW_M_PRIMARY} rejected, stepping down to m={HNSW_M_FALLBACK}");
        client
            .batch_execute(&try_build(HNSW_M_FALLBACK, HNSW_EF_CONSTRUCTION_FALLBACK))
            .await
            .map_err(|e| CoreError::StoreFailed(format!("hnsw index build failed at fallback parameters: {e}")))
    }

    fn build_filter_clause(filters: &QueryFilters, start_param: usize) -> (String, Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>>) {
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> = Vec::new();
        let mut idx = start_param;
        if let Some(ref uid) = filters.user_id {
            clauses.push(format!("user_id = ${idx}"));
            params.push(Box::new(uid.clone()));
            idx += 1;
        }
        if let Some(ref cid) = filters.conversation_id {
            clauses.push(format!("conversation_id = ${idx}"));
            params.push(Box::new(cid.clone()));
            idx += 1;
        }
        if !filters.metadata.is_empty() {
            let obj = serde_json::Value::Object(filters.metadata.clone().into_iter().collect());
            clauses.push(format!("metadata @> ${idx}::jsonb"));
            params.push(Box::new(obj));
            idx += 1;
        }
        let _ = idx;
        let clause = if clauses.is_empty() { String::new() } else { format!("AND {}", clauses.join(" AND ")) };
        (clause, params)
    }

    fn row_to_memory(row: &tokio_postgres::Row) -> Memory {
        let metadata_json: serde_json::Value = row.get("metadata");
        let metadata = match metadata_json {
            serde_json::Value::Object(m) => m.into_iter().collect(),
            _ => HashMap::new(),
        };
        let created_at: DateTime<Utc> = row.get("created_at");
        let last_accessed: DateTime<Utc> = row.get("last_accessed");
        Memory {
            id: row.get("id"),
            content: row.get("content"),
            embedding: Vec::new(),
            metadata,
            importance_score: row.get("importance_score"),
            user_id: row.get("user_id"),
            conversation_id: row.get("conversation_id"),
            created_at: created_at.to_rfc3339(),
            last_accessed: last_accessed.to_rfc3339(),
            access_count: row.get::<_, i64>("access_count") as u64,
        }
    }
}

fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    match h {
        tokio_postgres::config::Host::Tcp(s) => s.clone(),
        #[cfg(unix)]
        tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
    }
}

#[async_trait::async_trait]
impl VectorProvider for PgvectorProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, memory: &Memory) -> Result<(), CoreError> {
        if memory.embedding.len() != self.dim {
            return Err(CoreError::InvalidInput(format!(
                "embedding dim {} != configured {}",
                memory.embedding.len(),
                self.dim
            )));
        }
        let client = self.pool.get().await.map_err(pool_error)?;
        let embedding_str = format_embedding(&memory.embedding);
        let metadata_json = serde_json::Value::Object(memory.metadata.clone().into_iter().collect());
        let created_at = parse_timestamp(&memory.created_at);
        let last_accessed = parse_timestamp(&memory.last_accessed);
        let sql = format!(
            r#"INSERT INTO {table} (id, content, embedding, metadata, importance_score, user_id, conversation_id, created_at, last_accessed, access_count)
               VALUES ($1, $2, $3::vector, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO UPDATE SET
                   metadata = EXCLUDED.metadata,
                   importance_score = EXCLUDED.importance_score,
                   last_accessed = EXCLUDED.last_accessed,
                   access_count = EXCLUDED.access_count"#,
            table = self.table,
        );
        client
            .execute(
                &sql,
                &[
                    &memory.id,
                    &memory.content,
                    &embedding_str,
                    &metadata_json,
                    &memory.importance_score,
                    &memory.user_id,
                    &memory.conversation_id,
                    &created_at,
                    &last_accessed,
                    &(memory.access_count as i64),
                ],
            )
            .await
            .map_err(|e| query_error("store", e))?;
        Ok(())
    }

    async fn query(&self, query_embedding: &[f32], k: usize, filters: &QueryFilters) -> Result<Vec<ScoredMemory>, CoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let embedding_str = format_embedding(query_embedding);
        let (filter_clause, filter_params) = Self::build_filter_clause(filters, 3);
        let sql = format!(
            r#"SELECT id, content, metadata, importance_score, user_id, conversation_id, created_at, last_accessed, access_count,
                      1 - (embedding <=> $1::vector) AS similarity
               FROM {table}
               WHERE true {filter_clause}
               ORDER BY embedding <=> $1::vector
               LIMIT $2"#,
            table = self.table,
            filter_clause = filter_clause,
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&embedding_str, &(k as i64)];
        for p in &filter_params {
            params.push(p.as_ref());
        }
        let rows = client.query(&sql, &params).await.map_err(|e| query_error("query", e))?;
        Ok(rows
            .iter()
            .map(|row| {
                let similarity: f32 = row.get("similarity");
                ScoredMemory {
                    memory: Self::row_to_memory(row),
                    similarity: similarity.clamp(0.0, 1.0),
                }
            })
            .collect())
    }

    async fn delete(&self, memory_id: &str) -> Result<(), CoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let rows = client.execute(&sql, &[&memory_id]).await.map_err(|e| query_error("delete", e))?;
        if rows == 0 {
            return Err(CoreError::NotFound(memory_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, memory_id: &str) -> Result<Option<Memory>, CoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let sql = format!(
            "SELECT id, content, metadata, importance_score, user_id, conversation_id, created_at, last_accessed, access_count FROM {} WHERE id = $1",
            self.table
        );
        let row = client.query_opt(&sql, &[&memory_id]).await.map_err(|e| query_error("get", e))?;
        Ok(row.map(|r| Self::row_to_memory(&r)))
    }

    async fn health_check(&self) -> ProviderHealth {
        let start = Instant::now();
        let client = match self.pool.get().await {
            Ok(c) => c,
            Err(e) => {
                return ProviderHealth {
                    state: ProviderHealthState::Down,
                    consecutive_failures: 1,
                    latency_ms: None,
                    item_count: None,
                    last_ok: {
                        tracing::warn!(provider = %self.name, error = %e, "pgvector health check pool acquire failed");
                        None
                    },
                }
            }
        };
        let sql = format!("SELECT count(*) FROM {}", self.table);
        match client.query_one(&sql, &[]).await {
            Ok(row) => {
                let count: i64 = row.get(0);
                ProviderHealth {
                    state: ProviderHealthState::Healthy,
                    last_ok: Some(Utc::now().to_rfc3339()),
                    consecutive_failures: 0,
                    latency_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                    item_count: Some(count as u64),
                }
            }
            Err(_) => ProviderHealth {
                state: ProviderHealthState::Down,
                consecutive_failures: 1,
                ..Default::default()
            },
        }
    }

    async fn get_stats(&self) -> ProviderStats {
        let mut extra = HashMap::new();
        let item_count = match self.pool.get().await {
            Ok(client) => {
                let sql = format!("SELECT count(*) FROM {}", self.table);
                client
                    .query_one(&sql, &[])
                    .await
                    .ok()
                    .map(|row| row.get::<_, i64>(0) as u64)
                    .unwrap_or(0)
            }
            Err(_) => 0,
        };
        extra.insert("table".to_string(), serde_json::json!(self.table));
        ProviderStats { item_count, extra }
    }

    fn supports_get_recent(&self) -> bool {
        true
    }

    async fn get_recent(&self, k: usize, filters: &QueryFilters) -> Result<Vec<ScoredMemory>, CoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let (filter_clause, filter_params) = Self::build_filter_clause(filters, 2);
        let sql = format!(
            r#"SELECT id, content, metadata, importance_score, user_id, conversation_id, created_at, last_accessed, access_count
               FROM {table}
               WHERE true {filter_clause}
               ORDER BY created_at DESC
               LIMIT $1"#,
            table = self.table,
            filter_clause = filter_clause,
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&(k as i64)];
        for p in &filter_params {
            params.push(p.as_ref());
        }
        let rows = client.query(&sql, &params).await.map_err(|e| query_error("get_recent", e))?;
        Ok(rows
            .iter()
            .map(|row| ScoredMemory {
                memory: Self::row_to_memory(row),
                similarity: 1.0,
            })
            .collect())
    }
}
