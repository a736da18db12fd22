//! Per-provider health tracking (§4.2 "Health model"). Updated by every
//! live call's outcome and by periodic probes; a provider enters `Down`
//! after crossing the configured consecutive-failure threshold and is
//! skipped for read failover until a probe succeeds again.

use chrono::Utc;
use nexus_types::{ProviderHealth, ProviderHealthState};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct HealthTracker {
    threshold: u32,
    state: RwLock<ProviderHealth>,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Arc<Self> {
        Arc::new(Self {
            threshold,
            state: RwLock::new(ProviderHealth::default()),
        })
    }

    pub async fn snapshot(&self) -> ProviderHealth {
        self.state.read().await.clone()
    }

    pub async fn record_success(&self, latency_ms: f64, item_count: Option<u64>) {
        let mut s = self.state.write().await;
        s.state = ProviderHealthState::Healthy;
        s.consecutive_failures = 0;
        s.last_ok = Some(Utc::now().to_rfc3339());
        s.latency_ms = Some(latency_ms);
        if item_count.is_some() {
            s.item_count = item_count;
        }
    }

    pub async fn record_failure(&self) {
        let mut s = self.state.write().await;
        s.consecutive_failures += 1;
        s.state = if s.consecutive_failures >= self.threshold {
            ProviderHealthState::Down
        } else {
            ProviderHealthState::Degraded
        };
    }

    pub async fn is_down(&self) -> bool {
        self.state.read().await.state == ProviderHealthState::Down
    }

    pub async fn apply_probe(&self, probe: ProviderHealth) {
        let mut s = self.state.write().await;
        if probe.state == ProviderHealthState::Healthy {
            s.state = ProviderHealthState::Healthy;
            s.consecutive_failures = 0;
            s.last_ok = probe.last_ok.or(s.last_ok.clone());
        } else {
            s.consecutive_failures += 1;
            s.state = if s.consecutive_failures >= self.threshold {
                ProviderHealthState::Down
            } else {
                ProviderHealthState::Degraded
            };
        }
        s.latency_ms = probe.latency_ms.or(s.latency_ms);
        s.item_count = probe.item_count.or(s.item_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enters_down_after_threshold_failures() {
        let tracker = HealthTracker::new(3);
        for _ in 0..2 {
            tracker.record_failure().await;
            assert!(!tracker.is_down().await);
        }
        tracker.record_failure().await;
        assert!(tracker.is_down().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let tracker = HealthTracker::new(3);
        tracker.record_failure().await;
        tracker.record_failure().await;
        tracker.record_success(1.0, Some(5)).await;
        assert!(!tracker.is_down().await);
        let snap = tracker.snapshot().await;
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.item_count, Some(5));
    }
}
