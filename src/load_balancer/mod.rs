// src/load_balancer/mod.rs
mod algorithm;
mod least_connections;
mod round_robin;
mod weighted;

pub use algorithm::{eligible_backends, SelectError, SelectionPolicy}; // trait
pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedRoundRobinBalancer;
pub use crate::config::LoadBalancerAlgorithm;

#[cfg(test)]
pub(crate) use algorithm::test_support;

use std::sync::Arc;

pub fn create_selection_policy(algorithm: LoadBalancerAlgorithm) -> Arc<dyn SelectionPolicy> {
    match algorithm {
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::WeightedRoundRobin => Arc::new(WeightedRoundRobinBalancer::new()),
        LoadBalancerAlgorithm::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
    }
}
