// src/balancer.rs
// Core-facing entry point: membership, request handling and introspection.

use crate::config::{Config, HealthCheckConfig, LoadBalancerAlgorithm, RetryConfig};
use crate::health::{create_prober, HealthChecker, HealthStatus, Prober};
use crate::load_balancer::{create_selection_policy, SelectionPolicy};
use crate::metrics::MetricsCollector;
use crate::proxy::{
    BackendRegistry, BackendReport, Forwarder, ProxyDispatcher, ProxyError, RegistryError,
};
use crate::retry::RetryStrategy;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct LoadBalancer<F: Forwarder> {
    registry: Arc<BackendRegistry>,
    health: Arc<HealthChecker>,
    dispatcher: ProxyDispatcher<F>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<F: Forwarder> LoadBalancer<F> {
    pub fn builder(forwarder: F) -> LoadBalancerBuilder<F> {
        LoadBalancerBuilder::new(forwarder)
    }

    /// Build from a validated configuration and register its backends.
    pub async fn from_config(
        config: &Config,
        forwarder: F,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let mut builder = Self::builder(forwarder)
            .algorithm(config.algorithm)
            .health_check(config.health_check.clone())
            .retry(config.retry.clone());
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        let balancer = builder.build()?;

        for backend in &config.backends {
            balancer
                .add_backend_weighted(backend.url.as_str(), backend.weight)
                .await?;
        }
        Ok(balancer)
    }

    pub async fn add_backend(&self, address: &str) -> Result<(), RegistryError> {
        self.add_backend_weighted(address, 1).await
    }

    pub async fn add_backend_weighted(&self, address: &str, weight: u32) -> Result<(), RegistryError> {
        let backend = self.registry.add_backend_weighted(address, weight).await?;
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, HealthStatus::Healthy);
            metrics.update_backend_connections(&backend.id, 0);
        }
        Ok(())
    }

    pub async fn remove_backend(&self, address: &str) -> Result<(), RegistryError> {
        let backend = self.registry.remove_backend(address).await?;
        if let Some(metrics) = &self.metrics {
            metrics.forget_backend(&backend.id);
        }
        Ok(())
    }

    pub async fn handle_request(&self, request: &F::Request) -> Result<F::Response, ProxyError> {
        self.dispatcher.dispatch(request).await
    }

    pub async fn backend_statuses(&self) -> BTreeMap<String, HealthStatus> {
        let mut statuses = BTreeMap::new();
        for backend in self.registry.snapshot().iter() {
            statuses.insert(backend.id.clone(), backend.status().await);
        }
        statuses
    }

    /// Detailed per-backend view in registry order.
    pub async fn backend_reports(&self) -> Vec<BackendReport> {
        let snapshot = self.registry.snapshot();
        let mut reports = Vec::with_capacity(snapshot.len());
        for backend in snapshot.iter() {
            reports.push(backend.report().await);
        }
        reports
    }

    pub fn spawn_health_checker(&self) -> JoinHandle<()> {
        tokio::spawn(self.health.clone().start())
    }

    pub fn shutdown(&self) {
        self.health.shutdown();
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn policy(&self) -> &Arc<dyn SelectionPolicy> {
        self.dispatcher.policy()
    }
}

pub struct LoadBalancerBuilder<F: Forwarder> {
    forwarder: F,
    policy: Option<Arc<dyn SelectionPolicy>>,
    algorithm: LoadBalancerAlgorithm,
    health_check: HealthCheckConfig,
    retry: RetryConfig,
    prober: Option<Arc<dyn Prober>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<F: Forwarder> LoadBalancerBuilder<F> {
    pub fn new(forwarder: F) -> Self {
        Self {
            forwarder,
            policy: None,
            algorithm: LoadBalancerAlgorithm::default(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
            prober: None,
            metrics: None,
        }
    }

    pub fn algorithm(mut self, algorithm: LoadBalancerAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Use a ready-made policy instead of one built from `algorithm`.
    pub fn policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Override the prober derived from the health check configuration.
    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<LoadBalancer<F>> {
        let registry = Arc::new(BackendRegistry::new());
        let prober = match self.prober {
            Some(prober) => prober,
            None => create_prober(&self.health_check)?,
        };
        let policy = self
            .policy
            .unwrap_or_else(|| create_selection_policy(self.algorithm));

        tracing::info!(
            policy = policy.name(),
            prober = prober.name(),
            max_attempts = self.retry.max_attempts,
            "Load balancer configured"
        );

        let health = Arc::new(HealthChecker::new(
            self.health_check,
            registry.clone(),
            prober,
            self.metrics.clone(),
        ));
        let dispatcher = ProxyDispatcher::new(
            registry.clone(),
            policy,
            health.clone(),
            self.forwarder,
            RetryStrategy::new(self.retry),
            self.metrics.clone(),
        );

        Ok(LoadBalancer {
            registry,
            health,
            dispatcher,
            metrics: self.metrics,
        })
    }
}
