// src/proxy/backend.rs
use crate::health::{HealthStatus, Transition};
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use url::Url;

/// Mutable health fields of one backend, guarded together so a status is
/// never observed out of step with its failure count.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub suspected_since: Option<Instant>,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_checked_at: None,
            suspected_since: None,
        }
    }

    fn settle(&mut self, dead_threshold: u32) -> Option<Transition> {
        let from = self.status;
        let to = HealthStatus::from_failures(self.consecutive_failures, dead_threshold);
        self.status = to;
        self.last_checked_at = Some(Utc::now());
        match to {
            HealthStatus::Suspected if from != HealthStatus::Suspected => {
                self.suspected_since = Some(Instant::now());
            }
            HealthStatus::Suspected => {}
            _ => self.suspected_since = None,
        }
        Transition::between(from, to)
    }
}

#[derive(Debug)]
pub struct Backend {
    /// Normalized `scheme://host:port`; unique within a registry.
    pub id: String,
    pub url: Url,
    pub weight: u32,

    // Runtime state
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    health: RwLock<HealthRecord>,
    retired: AtomicBool,
}

impl Backend {
    /// `None` when the URL has no host or no known port to identify it by.
    pub(crate) fn new(url: Url, weight: u32) -> Option<Self> {
        let id = identity_of(&url)?;

        Some(Self {
            id,
            url,
            weight,
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            health: RwLock::new(HealthRecord::new()),
            retired: AtomicBool::new(false),
        })
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count one in-flight request; the count drops again with the guard.
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            backend: self.clone(),
            metrics: None,
        }
    }

    /// Set once the backend has left its registry. Requests still holding it
    /// run to completion but stop publishing per-backend gauges.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn status(&self) -> HealthStatus {
        self.health.read().await.status
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.health.read().await.consecutive_failures
    }

    pub async fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.health.read().await.last_checked_at
    }

    pub async fn health(&self) -> HealthRecord {
        self.health.read().await.clone()
    }

    /// Any success clears the failure streak and makes the backend healthy.
    pub async fn mark_success(&self) -> Option<Transition> {
        let mut health = self.health.write().await;
        health.consecutive_failures = 0;
        health.settle(1)
    }

    pub async fn mark_failure(&self, weight: u32, dead_threshold: u32) -> Option<Transition> {
        let mut health = self.health.write().await;
        health.consecutive_failures = health.consecutive_failures.saturating_add(weight);
        health.settle(dead_threshold)
    }

    /// Mark a backend dead once it has been suspected for longer than `window`.
    /// The failure count is raised to the threshold so status and count agree.
    pub async fn expire_suspicion(&self, window: Duration, dead_threshold: u32) -> Option<Transition> {
        let mut health = self.health.write().await;
        let expired = health.status == HealthStatus::Suspected
            && health
                .suspected_since
                .map_or(false, |since| since.elapsed() >= window);
        if !expired {
            return None;
        }
        health.consecutive_failures = health.consecutive_failures.max(dead_threshold);
        health.settle(dead_threshold)
    }

    pub async fn report(&self) -> BackendReport {
        let health = self.health().await;
        let metrics = self.get_metrics();
        BackendReport {
            id: self.id.clone(),
            weight: self.weight,
            status: health.status,
            consecutive_failures: health.consecutive_failures,
            last_checked_at: health.last_checked_at,
            active_connections: metrics.active_connections,
            total_requests: metrics.total_requests,
            failed_requests: metrics.failed_requests,
        }
    }

    pub fn get_metrics(&self) -> BackendMetrics {
        BackendMetrics {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// `scheme://host:port`, with the scheme's default port filled in.
pub(crate) fn identity_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}", url.scheme(), host, port))
}

#[derive(Debug)]
pub struct BackendMetrics {
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
}

/// Point-in-time view of one backend for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub id: String,
    pub weight: u32,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
}

/// Keeps a backend's active connection count raised while alive.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ConnectionGuard {
    /// Mirror the connection count into the gauge now and again on release,
    /// however the holder exits.
    pub fn publishing(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self.publish();
        self
    }

    fn publish(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        if !self.backend.is_retired() {
            metrics.update_backend_connections(&self.backend.id, self.backend.active_connections());
        }
    }
}

impl Deref for ConnectionGuard {
    type Target = Backend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.active_connections.fetch_sub(1, Ordering::AcqRel);
        self.publish();
    }
}
