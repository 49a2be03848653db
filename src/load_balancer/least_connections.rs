// src/load_balancer/least_connections.rs
use crate::load_balancer::{eligible_backends, SelectError, SelectionPolicy};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Picks the eligible backend with the fewest in-flight requests. Ties rotate
/// through a round-robin cursor instead of always favouring the first entry.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer {
    counter: AtomicU64,
}

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SelectionPolicy for LeastConnectionsBalancer {
    async fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        let eligible = eligible_backends(backends).await?;

        let loads: Vec<usize> = eligible.iter().map(|b| b.active_connections()).collect();
        let least = loads.iter().copied().min().unwrap_or(0);
        let tied: Vec<&Arc<Backend>> = eligible
            .iter()
            .zip(&loads)
            .filter(|(_, load)| **load == least)
            .map(|(b, _)| b)
            .collect();

        let cursor = self.counter.fetch_add(1, Ordering::AcqRel);
        let index = (cursor % tied.len() as u64) as usize;
        Ok(tied[index].clone())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
