// src/load_balancer/weighted.rs
use crate::load_balancer::{eligible_backends, SelectError, SelectionPolicy};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Round-robin where a backend of weight `w` owns `w` consecutive slots of
/// every cycle.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinBalancer {
    counter: AtomicU64,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SelectionPolicy for WeightedRoundRobinBalancer {
    async fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        let eligible = eligible_backends(backends).await?;
        let total: u64 = eligible.iter().map(|b| u64::from(b.weight.max(1))).sum();

        let mut slot = self.counter.fetch_add(1, Ordering::AcqRel) % total;
        for backend in &eligible {
            let weight = u64::from(backend.weight.max(1));
            if slot < weight {
                return Ok(backend.clone());
            }
            slot -= weight;
        }

        // slot < total, so the walk above always returns
        Ok(eligible[eligible.len() - 1].clone())
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
