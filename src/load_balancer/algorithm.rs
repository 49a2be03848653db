// src/load_balancer/algorithm.rs
use crate::health::HealthStatus;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no backends are registered")]
    NoBackendsAvailable,

    #[error("all backends are dead")]
    AllBackendsDead,
}

/// Picks one backend out of a registry snapshot.
///
/// Implementations must never return a `Dead` backend and must prefer
/// `Healthy` ones over `Suspected` ones.
#[async_trait]
pub trait SelectionPolicy: Send + Sync {
    async fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError>;

    fn name(&self) -> &'static str;
}

/// The backends a policy may choose from, in snapshot order: the healthy
/// ones if there are any, otherwise the suspected ones.
pub async fn eligible_backends(
    backends: &[Arc<Backend>],
) -> Result<Vec<Arc<Backend>>, SelectError> {
    if backends.is_empty() {
        return Err(SelectError::NoBackendsAvailable);
    }

    let mut healthy = Vec::with_capacity(backends.len());
    let mut suspected = Vec::new();
    for backend in backends {
        match backend.status().await {
            HealthStatus::Healthy => healthy.push(backend.clone()),
            HealthStatus::Suspected => suspected.push(backend.clone()),
            HealthStatus::Dead => {}
        }
    }

    if !healthy.is_empty() {
        Ok(healthy)
    } else if !suspected.is_empty() {
        Ok(suspected)
    } else {
        Err(SelectError::AllBackendsDead)
    }
}

pub use crate::config::LoadBalancerAlgorithm;


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_eligible_prefers_healthy() {
        let pool = backends(3);
        suspect(&pool[0]).await;
        kill(&pool[1]).await;

        let eligible = eligible_backends(&pool).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, pool[2].id);
    }

    #[tokio::test]
    async fn test_eligible_falls_back_to_suspected() {
        let pool = backends(3);
        suspect(&pool[0]).await;
        kill(&pool[1]).await;
        suspect(&pool[2]).await;

        let ids: Vec<_> = eligible_backends(&pool)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id.clone())
            .collect();
        assert_eq!(ids, vec![pool[0].id.clone(), pool[2].id.clone()]);
    }

    #[tokio::test]
    async fn test_eligible_errors() {
        assert_eq!(
            eligible_backends(&[]).await.unwrap_err(),
            SelectError::NoBackendsAvailable
        );

        let pool = backends(2);
        kill(&pool[0]).await;
        kill(&pool[1]).await;
        assert_eq!(
            eligible_backends(&pool).await.unwrap_err(),
            SelectError::AllBackendsDead
        );
    }
}
