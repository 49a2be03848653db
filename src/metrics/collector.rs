// src/metrics/collector.rs
use crate::health::HealthStatus;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,

    // Backend metrics
    pub backend_attempts_total: IntCounterVec,
    pub backend_attempt_duration_seconds: HistogramVec,
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,
    pub health_checks_total: IntCounterVec,

    // Pool metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Dispatched requests by final result"),
            &["result"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let backend_attempts_total = IntCounterVec::new(
            Opts::new("lb_backend_attempts_total", "Forward attempts per backend"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(backend_attempts_total.clone()))?;

        let backend_attempt_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_backend_attempt_duration_seconds",
                "Forward attempt duration",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_attempt_duration_seconds.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "Active backend connections",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (2=healthy, 1=suspected, 0=dead)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new("lb_health_checks_total", "Active health probes"),
            &["backend", "result"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            backend_attempts_total,
            backend_attempt_duration_seconds,
            backend_connections_active,
            backend_health_status,
            health_checks_total,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_request(&self, result: &str) {
        self.requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_attempt(&self, backend: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.backend_attempts_total
            .with_label_values(&[backend, outcome])
            .inc();

        self.backend_attempt_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_connections(&self, backend: &str, count: usize) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(count as i64);
    }

    pub fn update_backend_health(&self, backend: &str, status: HealthStatus) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(status.as_gauge());
    }

    pub fn record_health_check(&self, backend: &str, healthy: bool) {
        let result = if healthy { "success" } else { "failure" };
        self.health_checks_total
            .with_label_values(&[backend, result])
            .inc();
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }

    /// Drop the per-backend gauges of a backend that left the pool.
    pub fn forget_backend(&self, backend: &str) {
        let _ = self.backend_connections_active.remove_label_values(&[backend]);
        let _ = self.backend_health_status.remove_label_values(&[backend]);
    }
}
