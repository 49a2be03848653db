// src/health/probe.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot build probe target: {0}")]
    Target(String),
}

/// Liveness check for a single backend.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, backend: &Backend) -> Result<(), ProbeError>;

    fn name(&self) -> &'static str;
}

/// `GET <backend><path>`; any 2xx counts as alive.
pub struct HttpProber {
    client: Client,
    path: String,
}

impl HttpProber {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("upstream-balancer-health-check")
            .build()?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        let url = backend
            .url
            .join(&self.path)
            .map_err(|e| ProbeError::Target(e.to_string()))?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Succeeds when a TCP connection to the backend's host and port opens.
#[derive(Debug, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        let host = backend
            .url
            .host_str()
            .ok_or_else(|| ProbeError::Target(backend.id.clone()))?;
        let port = backend
            .url
            .port_or_known_default()
            .ok_or_else(|| ProbeError::Target(backend.id.clone()))?;

        // host_str keeps the brackets around IPv6 literals
        let host = host.trim_start_matches('[').trim_end_matches(']');
        TcpStream::connect((host, port))
            .await
            .map(drop)
            .map_err(|e| ProbeError::Connect(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
