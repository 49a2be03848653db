// src/health/status.rs
use serde::Serialize;
use std::fmt;

/// Health of a single backend as seen by selection.
///
/// `Suspected` backends still receive traffic when no `Healthy` one is left;
/// `Dead` backends never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Suspected,
    Dead,
}

impl HealthStatus {
    /// Threshold policy: `0` is healthy, anything below `dead_threshold` is
    /// suspected, the rest is dead.
    pub fn from_failures(consecutive_failures: u32, dead_threshold: u32) -> Self {
        if consecutive_failures == 0 {
            HealthStatus::Healthy
        } else if consecutive_failures < dead_threshold {
            HealthStatus::Suspected
        } else {
            HealthStatus::Dead
        }
    }

    pub fn is_selectable(self) -> bool {
        self != HealthStatus::Dead
    }

    /// Gauge encoding used by the metrics collector.
    pub fn as_gauge(self) -> i64 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Suspected => 1,
            HealthStatus::Dead => 0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Suspected => "suspected",
            HealthStatus::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// A status change produced by a single health update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

impl Transition {
    pub fn between(from: HealthStatus, to: HealthStatus) -> Option<Self> {
        (from != to).then_some(Self { from, to })
    }

    pub fn is_recovery(&self) -> bool {
        self.to == HealthStatus::Healthy
    }
}
