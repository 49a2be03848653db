// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backend {0} has weight 0")]
    ZeroWeight(String),

    #[error("backend {0} is listed more than once")]
    DuplicateBackend(String),

    #[error("backend url {0} must use http or https")]
    UnsupportedScheme(String),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("health check path must start with '/', got {0:?}")]
    InvalidHealthPath(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub algorithm: LoadBalancerAlgorithm,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: Vec::new(),
            algorithm: LoadBalancerAlgorithm::default(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !matches!(backend.url.scheme(), "http" | "https") {
                return Err(ConfigError::UnsupportedScheme(backend.url.to_string()));
            }
            if backend.weight == 0 {
                return Err(ConfigError::ZeroWeight(backend.url.to_string()));
            }
            let identity = (
                backend.url.scheme(),
                backend.url.host_str(),
                backend.url.port_or_known_default(),
            );
            if !seen.insert(identity) {
                return Err(ConfigError::DuplicateBackend(backend.url.to_string()));
            }
        }

        let hc = &self.health_check;
        if hc.interval_ms == 0 {
            return Err(ConfigError::NotPositive("health_check.interval_ms"));
        }
        if hc.timeout_ms == 0 {
            return Err(ConfigError::NotPositive("health_check.timeout_ms"));
        }
        if hc.dead_threshold == 0 {
            return Err(ConfigError::NotPositive("health_check.dead_threshold"));
        }
        if !hc.path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(hc.path.clone()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NotPositive("retry.max_attempts"));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("retry.attempt_timeout_ms"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Path answered by the balancer itself with the backend status report.
    #[serde(default = "default_status_path")]
    pub status_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            status_path: default_status_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    Http,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default)]
    pub probe: ProbeKind,
    /// Failure points at which a backend is marked dead.
    #[serde(default = "default_dead_threshold")]
    pub dead_threshold: u32,
    #[serde(default = "default_one")]
    pub probe_failure_weight: u32,
    #[serde(default = "default_one")]
    pub dispatch_failure_weight: u32,
    /// How long a backend may stay suspected without a success. 0 disables the window.
    #[serde(default = "default_suspect_timeout_ms")]
    pub suspect_timeout_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn suspect_timeout(&self) -> Option<Duration> {
        (self.suspect_timeout_ms > 0).then(|| Duration::from_millis(self.suspect_timeout_ms))
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            timeout_ms: default_probe_timeout_ms(),
            path: default_health_path(),
            probe: ProbeKind::default(),
            dead_threshold: default_dead_threshold(),
            probe_failure_weight: 1,
            dispatch_failure_weight: 1,
            suspect_timeout_ms: default_suspect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Zero disables the pause between attempts.
    #[serde(default)]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff_base_ms: 0,
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_status_path() -> String {
    "/__lb/backends".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_dead_threshold() -> u32 {
    3
}

fn default_suspect_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_backoff_max_ms() -> u64 {
    1_000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
