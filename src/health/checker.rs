// src/health/checker.rs
use super::probe::{ProbeError, Prober};
use super::status::{HealthStatus, Transition};
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Owns every health transition of the pool.
///
/// Evidence arrives from two places: the periodic probe loop started with
/// [`HealthChecker::start`], and request outcomes reported by the dispatcher
/// through [`HealthChecker::report_success`] / [`HealthChecker::report_failure`].
/// Neither path returns an error; failures only show up as state changes.
pub struct HealthChecker {
    config: HealthCheckConfig,
    registry: Arc<BackendRegistry>,
    prober: Arc<dyn Prober>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub transition: Option<Transition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub healthy: usize,
    pub suspected: usize,
    pub dead: usize,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        registry: Arc<BackendRegistry>,
        prober: Arc<dyn Prober>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            registry,
            prober,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Probe loop; returns when [`HealthChecker::shutdown`] is called.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Active health checks disabled");
            return;
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            interval = ?self.config.interval(),
            prober = self.prober.name(),
            "Starting health checker"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health checker shutting down");
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One probe round over every registered backend, dead ones included so
    /// they can come back.
    pub async fn check_all_backends(&self) -> RoundSummary {
        let backends = self.registry.snapshot();
        let checks = backends.iter().map(|backend| self.check_backend(backend));
        let results = futures::future::join_all(checks).await;

        for result in &results {
            if result.healthy {
                debug!(backend = %result.backend_id, ms = result.response_time_ms, "Probe ok");
            } else {
                debug!(
                    backend = %result.backend_id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Probe failed"
                );
            }
        }

        let mut summary = RoundSummary::default();
        for backend in backends.iter() {
            self.expire_suspicion(backend).await;
            match backend.status().await {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Suspected => summary.suspected += 1,
                HealthStatus::Dead => summary.dead += 1,
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(summary.healthy, backends.len());
        }

        debug!(
            healthy = summary.healthy,
            suspected = summary.suspected,
            dead = summary.dead,
            "Health check round complete"
        );
        summary
    }

    pub async fn check_backend(&self, backend: &Arc<Backend>) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = match timeout(self.config.timeout(), self.prober.probe(backend)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.config.timeout())),
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        let healthy = outcome.is_ok();
        if let Some(metrics) = &self.metrics {
            metrics.record_health_check(&backend.id, healthy);
        }

        let transition = if healthy {
            backend.mark_success().await
        } else {
            backend
                .mark_failure(self.config.probe_failure_weight, self.config.dead_threshold)
                .await
        };
        self.observe(backend, transition, "probe").await;

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error: outcome.err().map(|e| e.to_string()),
            transition,
        }
    }

    /// Passive evidence: a real request succeeded.
    pub async fn report_success(&self, backend: &Backend) {
        let transition = backend.mark_success().await;
        self.observe(backend, transition, "dispatch").await;
    }

    /// Passive evidence: a real request failed or timed out.
    pub async fn report_failure(&self, backend: &Backend) {
        let transition = backend
            .mark_failure(self.config.dispatch_failure_weight, self.config.dead_threshold)
            .await;
        self.observe(backend, transition, "dispatch").await;
        self.expire_suspicion(backend).await;
    }

    async fn expire_suspicion(&self, backend: &Backend) {
        if let Some(window) = self.config.suspect_timeout() {
            let transition = backend
                .expire_suspicion(window, self.config.dead_threshold)
                .await;
            self.observe(backend, transition, "suspect_timeout").await;
        }
    }

    async fn observe(&self, backend: &Backend, transition: Option<Transition>, source: &str) {
        let Some(transition) = transition else {
            return;
        };

        if transition.is_recovery() {
            info!(
                backend = %backend.id,
                from = %transition.from,
                source,
                "Backend recovered"
            );
        } else {
            let failures = backend.consecutive_failures().await;
            warn!(
                backend = %backend.id,
                from = %transition.from,
                to = %transition.to,
                failures,
                source,
                "Backend health degraded"
            );
        }

        if let Some(metrics) = &self.metrics {
            if !backend.is_retired() {
                metrics.update_backend_health(&backend.id, transition.to);
            }
        }
    }
}
