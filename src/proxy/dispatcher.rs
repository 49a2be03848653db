// src/proxy/dispatcher.rs
// Forwards one request with bounded failover across the pool.

use super::backend::Backend;
use super::forwarder::{ForwardError, Forwarder};
use super::registry::{BackendRegistry, Snapshot};
use crate::health::HealthChecker;
use crate::load_balancer::{SelectError, SelectionPolicy};
use crate::metrics::MetricsCollector;
use crate::retry::RetryStrategy;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// What the caller of a dispatch can see. Per-attempt failures only surface
/// wrapped in `RetriesExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no backends available")]
    NoBackendsAvailable,

    #[error("all backends are dead")]
    AllBackendsDead,

    #[error("retries exhausted after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ForwardError,
    },
}

impl From<SelectError> for ProxyError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoBackendsAvailable => ProxyError::NoBackendsAvailable,
            SelectError::AllBackendsDead => ProxyError::AllBackendsDead,
        }
    }
}

impl ProxyError {
    fn metric_label(&self) -> &'static str {
        match self {
            ProxyError::NoBackendsAvailable => "no_backends",
            ProxyError::AllBackendsDead => "all_dead",
            ProxyError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

pub struct ProxyDispatcher<F: Forwarder> {
    registry: Arc<BackendRegistry>,
    policy: Arc<dyn SelectionPolicy>,
    health: Arc<HealthChecker>,
    forwarder: F,
    retry: RetryStrategy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<F: Forwarder> ProxyDispatcher<F> {
    pub fn new(
        registry: Arc<BackendRegistry>,
        policy: Arc<dyn SelectionPolicy>,
        health: Arc<HealthChecker>,
        forwarder: F,
        retry: RetryStrategy,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            registry,
            policy,
            health,
            forwarder,
            retry,
            metrics,
        }
    }

    pub fn policy(&self) -> &Arc<dyn SelectionPolicy> {
        &self.policy
    }

    /// Forward `request`, failing over to other backends on attempt errors.
    ///
    /// Dropping the returned future cancels the in-flight attempt, releases
    /// its connection slot and reports nothing to the health checker.
    pub async fn dispatch(&self, request: &F::Request) -> Result<F::Response, ProxyError> {
        let span = info_span!("dispatch", request_id = %Uuid::new_v4());
        let result = self.dispatch_with_failover(request).instrument(span).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_request("success"),
                Err(err) => metrics.record_request(err.metric_label()),
            }
        }
        result
    }

    async fn dispatch_with_failover(
        &self,
        request: &F::Request,
    ) -> Result<F::Response, ProxyError> {
        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0;
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_tried: Option<String> = None;
        let mut last_error: Option<ForwardError> = None;

        while attempts < max_attempts {
            let snapshot = self.registry.snapshot();
            let candidates = without_tried(&snapshot, &tried, last_tried.as_deref()).await;
            let backend = self.policy.select(&candidates).await?;

            match self.attempt(&backend, request).await {
                Ok(response) => {
                    self.health.report_success(&backend).await;
                    debug!(backend = %backend.id, attempt = attempts + 1, "Request forwarded");
                    return Ok(response);
                }
                Err(err) => {
                    attempts += 1;
                    warn!(
                        backend = %backend.id,
                        attempt = attempts,
                        max_attempts,
                        error = %err,
                        "Forward attempt failed"
                    );
                    self.health.report_failure(&backend).await;
                    tried.insert(backend.id.clone());
                    last_tried = Some(backend.id.clone());
                    last_error = Some(err);

                    if attempts < max_attempts {
                        let pause = self.retry.backoff(attempts);
                        if !pause.is_zero() {
                            sleep(pause).await;
                        }
                    }
                }
            }
        }

        Err(ProxyError::RetriesExhausted {
            attempts,
            last: last_error
                .unwrap_or_else(|| ForwardError::Transport("no attempt was made".into())),
        })
    }

    /// One forward under the per-attempt timeout, holding a connection slot
    /// on `backend` for exactly its duration.
    async fn attempt(
        &self,
        backend: &Arc<Backend>,
        request: &F::Request,
    ) -> Result<F::Response, ForwardError> {
        let guard = backend.connection_guard().publishing(self.metrics.clone());

        let started = Instant::now();
        let limit = self.retry.attempt_timeout();
        let result = match timeout(limit, self.forwarder.forward(&guard, request)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(limit)),
        };

        drop(guard);

        backend.record_request(result.is_ok());
        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(&backend.id, result.is_ok(), started.elapsed());
        }
        result
    }
}

/// Candidates for the next attempt of one dispatch.
///
/// Every backend already tried is left out while an untried one can still be
/// selected. Once all selectable backends have had a turn, only the most
/// recent one is left out, and a lone survivor stays in.
async fn without_tried(
    snapshot: &Snapshot,
    tried: &HashSet<String>,
    last_tried: Option<&str>,
) -> Snapshot {
    if tried.is_empty() {
        return snapshot.clone();
    }

    let untried: Vec<_> = snapshot
        .iter()
        .filter(|b| !tried.contains(&b.id))
        .cloned()
        .collect();
    if any_selectable(&untried).await {
        return Arc::new(untried);
    }

    let Some(last) = last_tried else {
        return snapshot.clone();
    };
    let others: Vec<_> = snapshot.iter().filter(|b| b.id != last).cloned().collect();
    if any_selectable(&others).await {
        Arc::new(others)
    } else {
        snapshot.clone()
    }
}

async fn any_selectable(backends: &[Arc<Backend>]) -> bool {
    for backend in backends {
        if backend.status().await.is_selectable() {
            return true;
        }
    }
    false
}
