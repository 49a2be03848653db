// src/proxy/registry.rs
use super::backend::{identity_of, Backend};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// Ordered, immutable view of the registry at one point in time.
pub type Snapshot = Arc<Vec<Arc<Backend>>>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid backend address {0:?}")]
    InvalidAddress(String),

    #[error("invalid weight 0 for backend {0}")]
    InvalidWeight(String),

    #[error("backend {0} is already registered")]
    DuplicateBackend(String),

    #[error("backend {0} is not registered")]
    NotFound(String),
}

/// Membership of the pool.
///
/// Readers load the current snapshot without locking; writers serialize on a
/// mutex and publish a fresh copy of the list. Health fields live on each
/// `Backend` and are never touched here, so membership changes do not block
/// health updates.
pub struct BackendRegistry {
    snapshot: ArcSwap<Vec<Arc<Backend>>>,
    index: DashMap<String, Arc<Backend>>,
    write_lock: Mutex<()>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            index: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn add_backend(&self, address: &str) -> Result<Arc<Backend>, RegistryError> {
        self.add_backend_weighted(address, 1).await
    }

    pub async fn add_backend_weighted(
        &self,
        address: &str,
        weight: u32,
    ) -> Result<Arc<Backend>, RegistryError> {
        let (url, id) = parse_address(address)?;
        if weight == 0 {
            return Err(RegistryError::InvalidWeight(id));
        }

        let _guard = self.write_lock.lock().await;
        if self.index.contains_key(&id) {
            return Err(RegistryError::DuplicateBackend(id));
        }

        let backend = Backend::new(url, weight)
            .map(Arc::new)
            .ok_or_else(|| RegistryError::InvalidAddress(address.to_string()))?;
        let mut next = Vec::clone(&self.snapshot.load());
        next.push(backend.clone());
        self.index.insert(id, backend.clone());
        self.snapshot.store(Arc::new(next));

        tracing::info!(backend = %backend.id, weight, "Added backend");
        Ok(backend)
    }

    /// Drop a backend from future snapshots. Requests already holding it finish normally.
    pub async fn remove_backend(&self, address: &str) -> Result<Arc<Backend>, RegistryError> {
        let id = match parse_address(address) {
            Ok((_, id)) => id,
            Err(_) => return Err(RegistryError::NotFound(address.to_string())),
        };

        let _guard = self.write_lock.lock().await;
        let (_, removed) = self
            .index
            .remove(&id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        removed.retire();

        let next: Vec<_> = self
            .snapshot
            .load()
            .iter()
            .filter(|b| b.id != id)
            .cloned()
            .collect();
        self.snapshot.store(Arc::new(next));

        tracing::info!(backend = %id, "Removed backend");
        Ok(removed)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.load_full()
    }

    pub fn get_backend(&self, address: &str) -> Option<Arc<Backend>> {
        let (_, id) = parse_address(address).ok()?;
        self.index.get(&id).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_address(address: &str) -> Result<(Url, String), RegistryError> {
    let invalid = || RegistryError::InvalidAddress(address.to_string());
    let url = Url::parse(address.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let id = identity_of(&url).ok_or_else(invalid)?;
    Ok((url, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_preserves_insertion_order() {
        let registry = BackendRegistry::new();
        for port in [9003, 9001, 9002] {
            registry
                .add_backend(&format!("http://127.0.0.1:{}", port))
                .await
                .unwrap();
        }

        let ids: Vec<_> = registry.snapshot().iter().map(|b| b.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                "http://127.0.0.1:9003",
                "http://127.0.0.1:9001",
                "http://127.0.0.1:9002"
            ]
        );
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_and_duplicate() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.add_backend("not a url").await,
            Err(RegistryError::InvalidAddress(_))
        ));
        assert!(matches!(
            registry.add_backend("unix:/tmp/socket").await,
            Err(RegistryError::InvalidAddress(_))
        ));
        assert!(matches!(
            registry.add_backend_weighted("http://a:1", 0).await,
            Err(RegistryError::InvalidWeight(_))
        ));

        registry.add_backend("http://example.com").await.unwrap();
        // Same identity once the default port is filled in.
        assert_eq!(
            registry.add_backend("http://example.com:80/").await.unwrap_err(),
            RegistryError::DuplicateBackend("http://example.com:80".into())
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_keeps_held_snapshot_intact() {
        let registry = BackendRegistry::new();
        registry.add_backend("http://127.0.0.1:9001").await.unwrap();
        registry.add_backend("http://127.0.0.1:9002").await.unwrap();

        let before = registry.snapshot();
        let removed = registry.remove_backend("http://127.0.0.1:9001").await.unwrap();

        assert!(removed.is_retired());
        assert!(!before[1].is_retired());
        assert_eq!(before.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_backend("http://127.0.0.1:9001").is_none());
        assert!(registry.get_backend("http://127.0.0.1:9002").is_some());

        assert_eq!(
            registry.remove_backend("http://127.0.0.1:9001").await.unwrap_err(),
            RegistryError::NotFound("http://127.0.0.1:9001".into())
        );
        assert!(matches!(
            registry.remove_backend("garbage").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_all_visible() {
        let registry = Arc::new(BackendRegistry::new());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .add_backend(&format!("http://10.0.0.{}:80", i))
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(registry.len(), 32);
        assert_eq!(registry.snapshot().len(), 32);
    }
}
