// tests/load_balancer_tests.rs
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use upstream_balancer::config::{HealthCheckConfig, LoadBalancerAlgorithm, RetryConfig};
use upstream_balancer::health::{HealthStatus, ProbeError, Prober};
use upstream_balancer::metrics::{MetricsCollector, MetricsRegistry};
use upstream_balancer::proxy::{Backend, ForwardError, Forwarder, ProxyError, RegistryError};
use upstream_balancer::LoadBalancer;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Ok,
    Fail,
    Hang,
    Gated,
}

#[derive(Default)]
struct Shared {
    modes: Mutex<HashMap<String, Mode>>,
    calls: Mutex<Vec<String>>,
    gate: Notify,
}

impl Shared {
    fn set(&self, id: &str, mode: Mode) {
        self.modes.lock().unwrap().insert(id.to_string(), mode);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
struct ScriptedForwarder {
    shared: Arc<Shared>,
}

#[async_trait]
impl Forwarder for ScriptedForwarder {
    type Request = &'static str;
    type Response = String;

    async fn forward(
        &self,
        backend: &Backend,
        request: &Self::Request,
    ) -> Result<String, ForwardError> {
        self.shared.calls.lock().unwrap().push(backend.id.clone());
        let mode = self
            .shared
            .modes
            .lock()
            .unwrap()
            .get(&backend.id)
            .copied()
            .unwrap_or(Mode::Ok);

        match mode {
            Mode::Ok => Ok(format!("{} from {}", request, backend.id)),
            Mode::Fail => Err(ForwardError::Connect("connection refused".into())),
            Mode::Hang => std::future::pending().await,
            Mode::Gated => {
                self.shared.gate.notified().await;
                Ok(format!("{} from {}", request, backend.id))
            }
        }
    }
}

/// Probe outcome is controlled per backend id.
#[derive(Default)]
struct ScriptedProber {
    down: Mutex<HashSet<String>>,
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        if self.down.lock().unwrap().contains(&backend.id) {
            Err(ProbeError::Status(503))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn addr(i: u16) -> String {
    format!("http://127.0.0.1:{}", 7100 + i)
}

struct Harness {
    lb: Arc<LoadBalancer<ScriptedForwarder>>,
    shared: Arc<Shared>,
    prober: Arc<ScriptedProber>,
}

async fn harness(n: u16, max_attempts: u32) -> Harness {
    harness_with(n, max_attempts, HealthCheckConfig::default(), None).await
}

async fn harness_with(
    n: u16,
    max_attempts: u32,
    health: HealthCheckConfig,
    metrics: Option<Arc<MetricsCollector>>,
) -> Harness {
    let forwarder = ScriptedForwarder::default();
    let shared = forwarder.shared.clone();
    let prober = Arc::new(ScriptedProber::default());

    let mut builder = LoadBalancer::builder(forwarder)
        .algorithm(LoadBalancerAlgorithm::RoundRobin)
        .health_check(health)
        .retry(RetryConfig {
            max_attempts,
            attempt_timeout_ms: 60_000,
            ..RetryConfig::default()
        })
        .prober(prober.clone());
    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }
    let lb = builder.build().unwrap();

    for i in 0..n {
        lb.add_backend(&addr(i)).await.unwrap();
    }

    Harness {
        lb: Arc::new(lb),
        shared,
        prober,
    }
}

async fn wait_for_connections(backend: &Backend, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.active_connections() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

#[tokio::test]
async fn test_each_backend_selected_once_per_cycle() {
    let h = harness(3, 1).await;

    for _ in 0..3 {
        h.lb.handle_request(&"ping").await.unwrap();
    }

    let calls: HashSet<_> = h.shared.calls().into_iter().collect();
    assert_eq!(calls.len(), 3);
    for i in 0..3 {
        assert!(calls.contains(&addr(i)));
    }
}

#[tokio::test]
async fn test_dead_backend_is_never_selected() {
    let h = harness(3, 1).await;
    let victim = h.lb.registry().get_backend(&addr(1)).unwrap();
    for _ in 0..3 {
        h.lb.health_checker().report_failure(&victim).await;
    }
    assert_eq!(victim.status().await, HealthStatus::Dead);

    for _ in 0..30 {
        h.lb.handle_request(&"ping").await.unwrap();
    }
    assert!(!h.shared.calls().contains(&addr(1)));
}

#[tokio::test]
async fn test_selection_errors() {
    let empty = harness(0, 3).await;
    assert!(matches!(
        empty.lb.handle_request(&"ping").await,
        Err(ProxyError::NoBackendsAvailable)
    ));

    let h = harness(2, 3).await;
    for backend in h.lb.registry().snapshot().iter() {
        for _ in 0..3 {
            h.lb.health_checker().report_failure(backend).await;
        }
    }
    assert!(matches!(
        h.lb.handle_request(&"ping").await,
        Err(ProxyError::AllBackendsDead)
    ));
    assert!(h.shared.calls().is_empty());
}

#[tokio::test]
async fn test_failures_only_touch_the_failing_backend() {
    let h = harness(2, 3).await;
    let failing = h.lb.registry().get_backend(&addr(0)).unwrap();
    let other = h.lb.registry().get_backend(&addr(1)).unwrap();

    h.lb.health_checker().report_failure(&failing).await;
    assert_eq!(failing.status().await, HealthStatus::Suspected);
    h.lb.health_checker().report_failure(&failing).await;
    assert_eq!(failing.status().await, HealthStatus::Suspected);
    h.lb.health_checker().report_failure(&failing).await;
    assert_eq!(failing.status().await, HealthStatus::Dead);

    assert_eq!(other.status().await, HealthStatus::Healthy);
    assert_eq!(other.consecutive_failures().await, 0);
}

#[tokio::test]
async fn test_single_backend_dies_within_one_request() {
    let h = harness(1, 3).await;
    h.shared.set(&addr(0), Mode::Fail);

    let err = h.lb.handle_request(&"ping").await.unwrap_err();
    assert!(matches!(err, ProxyError::RetriesExhausted { attempts: 3, .. }));

    let statuses = h.lb.backend_statuses().await;
    assert_eq!(statuses[&addr(0)], HealthStatus::Dead);
    assert!(matches!(
        h.lb.handle_request(&"ping").await,
        Err(ProxyError::AllBackendsDead)
    ));
}

#[tokio::test]
async fn test_success_resets_suspected_backend() {
    let h = harness(1, 1).await;
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();
    h.lb.health_checker().report_failure(&backend).await;
    h.lb.health_checker().report_failure(&backend).await;
    assert_eq!(backend.status().await, HealthStatus::Suspected);
    assert_eq!(backend.consecutive_failures().await, 2);

    let response = h.lb.handle_request(&"ping").await.unwrap();
    assert_eq!(response, format!("ping from {}", addr(0)));
    assert_eq!(backend.status().await, HealthStatus::Healthy);
    assert_eq!(backend.consecutive_failures().await, 0);
}

#[tokio::test]
async fn test_retry_budget_spans_distinct_backends() {
    let h = harness(3, 3).await;
    for i in 0..3 {
        h.shared.set(&addr(i), Mode::Fail);
    }

    let err = h.lb.handle_request(&"ping").await.unwrap_err();
    match err {
        ProxyError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, ForwardError::Connect(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    let calls = h.shared.calls();
    assert_eq!(calls.len(), 3);
    let distinct: HashSet<_> = calls.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[tokio::test]
async fn test_connection_counts_return_to_zero_after_burst() {
    let h = harness(3, 3).await;
    h.shared.set(&addr(2), Mode::Fail);

    let requests = (0..60).map(|_| {
        let lb = h.lb.clone();
        tokio::spawn(async move { lb.handle_request(&"burst").await })
    });
    for result in futures::future::join_all(requests).await {
        assert!(result.unwrap().is_ok());
    }

    for backend in h.lb.registry().snapshot().iter() {
        assert_eq!(backend.active_connections(), 0, "{}", backend.id);
    }
    let reports = h.lb.backend_reports().await;
    let total: u64 = reports.iter().map(|r| r.total_requests).sum();
    assert!(total >= 60);
}

#[tokio::test]
async fn test_cancelled_request_releases_connection() {
    let h = harness(1, 3).await;
    h.shared.set(&addr(0), Mode::Hang);
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();

    let lb = h.lb.clone();
    let task = tokio::spawn(async move { lb.handle_request(&"slow").await });
    wait_for_connections(&backend, 1).await;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(backend.active_connections(), 0);
    assert_eq!(backend.status().await, HealthStatus::Healthy);
    assert_eq!(backend.consecutive_failures().await, 0);
}

#[tokio::test]
async fn test_retry_budget_spans_distinct_suspected_backends() {
    let h = harness(3, 3).await;
    for backend in h.lb.registry().snapshot().iter() {
        h.lb.health_checker().report_failure(backend).await;
        h.shared.set(&backend.id, Mode::Fail);
    }

    let err = h.lb.handle_request(&"ping").await.unwrap_err();
    assert!(matches!(err, ProxyError::RetriesExhausted { attempts: 3, .. }));

    let calls = h.shared.calls();
    let distinct: HashSet<_> = calls.iter().collect();
    assert_eq!(distinct.len(), 3, "calls: {:?}", calls);
}

fn gauge_line(metrics: &MetricsRegistry, name: &str, backend: &str) -> Option<String> {
    let text = String::from_utf8(metrics.gather().unwrap()).unwrap();
    let prefix = format!("{}{{backend=\"{}\"}}", name, backend);
    text.lines()
        .find(|line| line.starts_with(&prefix))
        .map(str::to_string)
}

#[tokio::test]
async fn test_connection_gauge_follows_cancelled_request() {
    let metrics = MetricsRegistry::new().unwrap();
    let h = harness_with(1, 3, HealthCheckConfig::default(), Some(metrics.collector())).await;
    h.shared.set(&addr(0), Mode::Hang);
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();

    let outcome =
        tokio::time::timeout(Duration::from_millis(50), h.lb.handle_request(&"slow")).await;
    assert!(outcome.is_err());

    assert_eq!(backend.active_connections(), 0);
    assert_eq!(
        gauge_line(&metrics, "lb_backend_connections_active", &backend.id).as_deref(),
        Some(format!("lb_backend_connections_active{{backend=\"{}\"}} 0", backend.id).as_str())
    );
}

#[tokio::test]
async fn test_removed_backend_gauges_stay_gone() {
    let metrics = MetricsRegistry::new().unwrap();
    let h = harness_with(1, 1, HealthCheckConfig::default(), Some(metrics.collector())).await;
    h.shared.set(&addr(0), Mode::Gated);
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();

    let lb = h.lb.clone();
    let task = tokio::spawn(async move { lb.handle_request(&"held").await });
    wait_for_connections(&backend, 1).await;
    assert!(gauge_line(&metrics, "lb_backend_connections_active", &backend.id).is_some());

    h.lb.remove_backend(&addr(0)).await.unwrap();
    h.shared.gate.notify_one();
    task.await.unwrap().unwrap();

    // A failure reported after removal must not bring the health gauge back either.
    h.lb.health_checker().report_failure(&backend).await;

    assert!(gauge_line(&metrics, "lb_backend_connections_active", &backend.id).is_none());
    assert!(gauge_line(&metrics, "lb_backend_health_status", &backend.id).is_none());
}

#[tokio::test]
async fn test_removal_does_not_disturb_in_flight_request() {
    let h = harness(1, 1).await;
    h.shared.set(&addr(0), Mode::Gated);
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();

    let lb = h.lb.clone();
    let task = tokio::spawn(async move { lb.handle_request(&"held").await });
    wait_for_connections(&backend, 1).await;

    h.lb.remove_backend(&addr(0)).await.unwrap();
    assert!(h.lb.backend_statuses().await.is_empty());

    h.shared.gate.notify_one();
    let response = task.await.unwrap().unwrap();
    assert_eq!(response, format!("held from {}", addr(0)));
    assert_eq!(backend.active_connections(), 0);

    assert_eq!(
        h.lb.remove_backend(&addr(0)).await,
        Err(RegistryError::NotFound(addr(0)))
    );
    assert!(matches!(
        h.lb.handle_request(&"ping").await,
        Err(ProxyError::NoBackendsAvailable)
    ));
}

#[tokio::test]
async fn test_membership_errors() {
    let h = harness(1, 1).await;
    assert!(matches!(
        h.lb.add_backend(&addr(0)).await,
        Err(RegistryError::DuplicateBackend(_))
    ));
    assert!(matches!(
        h.lb.add_backend("not a url").await,
        Err(RegistryError::InvalidAddress(_))
    ));
    assert!(matches!(
        h.lb.add_backend_weighted(&addr(5), 0).await,
        Err(RegistryError::InvalidWeight(_))
    ));
}

#[tokio::test]
async fn test_backend_statuses_reflect_probe_rounds() {
    let h = harness(3, 1).await;
    h.prober.down.lock().unwrap().insert(addr(1));

    let checker = h.lb.health_checker();
    checker.check_all_backends().await;
    let statuses = h.lb.backend_statuses().await;
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[&addr(0)], HealthStatus::Healthy);
    assert_eq!(statuses[&addr(1)], HealthStatus::Suspected);

    checker.check_all_backends().await;
    let summary = checker.check_all_backends().await;
    assert_eq!(summary.healthy, 2);
    assert_eq!(summary.dead, 1);
    assert_eq!(h.lb.backend_statuses().await[&addr(1)], HealthStatus::Dead);

    h.prober.down.lock().unwrap().clear();
    checker.check_all_backends().await;
    assert_eq!(h.lb.backend_statuses().await[&addr(1)], HealthStatus::Healthy);
}

#[tokio::test]
async fn test_background_checker_stops_on_shutdown() {
    let health = HealthCheckConfig {
        interval_ms: 10,
        ..HealthCheckConfig::default()
    };
    let h = harness_with(1, 1, health, None).await;
    h.prober.down.lock().unwrap().insert(addr(0));
    let backend = h.lb.registry().get_backend(&addr(0)).unwrap();

    let handle = h.lb.spawn_health_checker();
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.status().await != HealthStatus::Dead {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backend never marked dead");
    assert!(backend.last_checked_at().await.is_some());

    h.lb.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("checker did not stop")
        .unwrap();
}
