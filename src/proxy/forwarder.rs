// src/proxy/forwarder.rs
use super::backend::Backend;
use async_trait::async_trait;
use std::time::Duration;

/// Why a single forward attempt did not produce a usable response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend answered with status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ForwardError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ForwardError::Timeout(_))
    }
}

/// Sends one opaque request to one backend.
///
/// The request is borrowed so the dispatcher can hand the same value to
/// another backend after a failed attempt.
#[async_trait]
pub trait Forwarder: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    async fn forward(
        &self,
        backend: &Backend,
        request: &Self::Request,
    ) -> Result<Self::Response, ForwardError>;
}
