//! Fire-and-forget task supervision (§5, §9 "coroutine / async" note).
//!
//! Mirror writes and graph ingest are submitted here rather than awaited on
//! the request path: each task gets its own deadline (default 60s, longer
//! than the request deadline it detaches from) and a panic inside one never
//! reaches the caller or the process. Outcomes are only counted and logged;
//! nothing here is allowed to affect the primary write's result.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default deadline for detached background work, per §5.
pub const DEFAULT_BACKGROUND_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TaskCounters {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TaskCounters {
        TaskCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Supervises arbitrary fire-and-forget futures, grouped by a `kind` label
/// (e.g. `"mirror:qdrant"`, `"graph_ingest"`) for reporting.
pub struct BackgroundSupervisor {
    counters: Arc<RwLock<std::collections::HashMap<String, Arc<Counters>>>>,
}

impl Default for BackgroundSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSupervisor {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }

    async fn counters_for(&self, kind: &str) -> Arc<Counters> {
        if let Some(c) = self.counters.read().await.get(kind) {
            return Arc::clone(c);
        }
        let mut guard = self.counters.write().await;
        Arc::clone(guard.entry(kind.to_string()).or_insert_with(|| Arc::new(Counters::default())))
    }

    /// Submit `fut` to run detached with `deadline`. Success/failure/timeout/
    /// panic are all logged and counted under `kind`; none of them are
    /// visible to the caller of `submit`.
    pub async fn submit<F, E>(&self, kind: &str, deadline: Duration, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let counters = self.counters_for(kind).await;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        let kind = kind.to_string();
        tokio::spawn(async move {
            let handle = tokio::spawn(async move { tokio::time::timeout(deadline, fut).await });
            match handle.await {
                Ok(Ok(Ok(()))) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Ok(Err(e))) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(task_kind = %kind, error = %e, "background task failed");
                }
                Ok(Err(_elapsed)) => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(task_kind = %kind, "background task timed out");
                }
                Err(join_err) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task_kind = %kind, error = %join_err, "background task panicked");
                }
            }
        });
    }

    /// Submit with the default background deadline.
    pub async fn submit_default<F, E>(&self, kind: &str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.submit(kind, DEFAULT_BACKGROUND_DEADLINE, fut).await
    }

    pub async fn counters(&self, kind: &str) -> TaskCounters {
        self.counters_for(kind).await.snapshot()
    }

    pub async fn all_counters(&self) -> std::collections::HashMap<String, TaskCounters> {
        let guard = self.counters.read().await;
        guard.iter().map(|(k, v)| (k.clone(), v.snapshot())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn success_is_counted() {
        let sup = BackgroundSupervisor::new();
        sup.submit_default("t", async { Ok::<(), String>(()) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let c = sup.counters("t").await;
        assert_eq!(c.submitted, 1);
        assert_eq!(c.succeeded, 1);
    }

    #[tokio::test]
    async fn failure_is_counted_and_does_not_propagate() {
        let sup = BackgroundSupervisor::new();
        sup.submit_default("t", async { Err::<(), String>("boom".to_string()) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let c = sup.counters("t").await;
        assert_eq!(c.failed, 1);
    }

    #[tokio::test]
    async fn timeout_is_counted() {
        let sup = BackgroundSupervisor::new();
        sup.submit("t", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), String>(())
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let c = sup.counters("t").await;
        assert_eq!(c.timed_out, 1);
    }

    #[tokio::test]
    async fn panic_is_counted_and_does_not_crash_process() {
        let sup = BackgroundSupervisor::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        sup.submit_default("t", async move {
            ran2.store(true, Ordering::SeqCst);
            panic!("deliberate");
            #[allow(unreachable_code)]
            Ok::<(), String>(())
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
        let c = sup.counters("t").await;
        assert_eq!(c.panicked, 1);
    }
}
