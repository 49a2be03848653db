// src/health/mod.rs
mod checker;
mod probe;
mod status;

pub use checker::{HealthCheckResult, HealthChecker, RoundSummary};
pub use probe::{HttpProber, ProbeError, Prober, TcpProber};
pub use status::{HealthStatus, Transition};

use crate::config::{HealthCheckConfig, ProbeKind};
use std::sync::Arc;

/// Build the prober named by the configuration.
pub fn create_prober(config: &HealthCheckConfig) -> anyhow::Result<Arc<dyn Prober>> {
    Ok(match config.probe {
        ProbeKind::Http => Arc::new(HttpProber::new(config.path.clone(), config.timeout())?),
        ProbeKind::Tcp => Arc::new(TcpProber),
    })
}
