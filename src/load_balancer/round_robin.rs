// src/load_balancer/round_robin.rs
use crate::load_balancer::{eligible_backends, SelectError, SelectionPolicy};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cycles through the eligible backends in registry order.
///
/// The cursor only ever grows; it is reduced modulo the eligible count when
/// used, so every call observes a distinct raw value.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of selections served so far.
    pub fn cursor(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SelectionPolicy for RoundRobinBalancer {
    async fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        let eligible = eligible_backends(backends).await?;
        let cursor = self.counter.fetch_add(1, Ordering::AcqRel);
        let index = (cursor % eligible.len() as u64) as usize;
        Ok(eligible[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
