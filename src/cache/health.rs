//! Health Checker Module
//!
//! Synthetic set/get/delete round trip against a backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{BackendStats, CacheBackend};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};

/// TTL of the probe key, so an interrupted probe cleans itself up.
const PROBE_TTL: Duration = Duration::from_secs(1);

// == Health Report ==
/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp of the probe
    pub checked_at: String,
}

impl HealthReport {
    fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn unhealthy(error: &CacheError) -> Self {
        Self {
            healthy: false,
            error: Some(error.to_string()),
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// == Health Checker ==
#[derive(Clone)]
pub struct HealthChecker {
    backend: Arc<dyn CacheBackend>,
    /// Shared by clones so each probe key is distinct
    probe_seq: Arc<AtomicU64>,
}

impl HealthChecker {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            probe_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Probes the backend. Failures are reported, never returned.
    pub async fn check(&self, ctx: &CacheContext) -> HealthReport {
        match self.probe(ctx).await {
            Ok(()) => HealthReport::healthy(),
            Err(e) => {
                warn!(kind = self.backend.kind(), error = %e, "Cache health check failed");
                HealthReport::unhealthy(&e)
            }
        }
    }

    pub async fn stats(&self, ctx: &CacheContext) -> Result<BackendStats> {
        self.backend.stats(ctx).await
    }

    async fn probe(&self, ctx: &CacheContext) -> Result<()> {
        let seq = self.probe_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("health_check:{}:{}", current_timestamp_ms(), seq);
        let sentinel = format!("ok:{}", seq).into_bytes();

        self.backend
            .set(ctx, &key, sentinel.clone(), PROBE_TTL)
            .await?;

        let read = self.backend.get(ctx, &key).await?;
        if read != sentinel {
            return Err(CacheError::Transport(
                "health probe read back a different value".to_string(),
            ));
        }

        self.backend.delete(ctx, &key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, LocalBackend};

    fn ctx() -> CacheContext {
        CacheContext::background()
    }

    #[tokio::test]
    async fn test_healthy_backend() {
        let backend = Arc::new(LocalBackend::new(CacheOptions::default()));
        let checker = HealthChecker::new(backend.clone());

        let report = checker.check(&ctx()).await;
        assert!(report.healthy);
        assert!(report.error.is_none());
        assert!(!report.checked_at.is_empty());
        // Probe key is cleaned up
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_closed_backend_is_unhealthy() {
        let backend = Arc::new(LocalBackend::new(CacheOptions::default()));
        backend.close().await.unwrap();

        let report = HealthChecker::new(backend).check(&ctx()).await;
        assert!(!report.healthy);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_context_is_unhealthy() {
        let checker = HealthChecker::new(Arc::new(LocalBackend::new(CacheOptions::default())));
        let ctx = ctx();
        ctx.cancel();

        let report = checker.check(&ctx).await;
        assert!(!report.healthy);
    }

    #[tokio::test]
    async fn test_probe_sequence_is_per_checker_and_shared_by_clones() {
        let backend: Arc<dyn CacheBackend> = Arc::new(LocalBackend::new(CacheOptions::default()));
        let checker = HealthChecker::new(backend.clone());
        let clone = checker.clone();

        assert!(checker.check(&ctx()).await.healthy);
        assert!(clone.check(&ctx()).await.healthy);
        assert_eq!(checker.probe_seq.load(Ordering::Relaxed), 2);

        let other = HealthChecker::new(backend);
        assert_eq!(other.probe_seq.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stats_shape_is_local() {
        let checker = HealthChecker::new(Arc::new(LocalBackend::new(CacheOptions::default())));
        let stats = checker.stats(&ctx()).await.unwrap();
        assert!(matches!(stats, BackendStats::Local { .. }));
    }
}
