// src/proxy/pool.rs
use super::backend::Backend;
use crate::config::BackendConfig;
use crate::load_balancer::Balancer;
use crate::metrics::ThroughputStats;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("backend '{0}' already exists")]
    Duplicate(String),
}

struct PoolInner {
    backends: Vec<Arc<Backend>>,
    algorithm: Arc<dyn Balancer>,
}

/// Ordered backend membership plus the active selection algorithm, both
/// behind one lock so a reader always sees a consistent pair. Readers copy
/// snapshots out and release the lock before doing any work.
pub struct BackendPool {
    inner: RwLock<PoolInner>,
    counter: AtomicU64,
    throughput: ThroughputStats,
}

impl BackendPool {
    pub fn new(algorithm: Arc<dyn Balancer>) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                backends: Vec::new(),
                algorithm,
            }),
            counter: AtomicU64::new(0),
            throughput: ThroughputStats::new(),
        }
    }

    pub fn from_configs(configs: &[BackendConfig], algorithm: Arc<dyn Balancer>) -> Self {
        let pool = Self::new(algorithm);
        {
            let mut inner = pool.inner.write().unwrap();
            for config in configs {
                inner.backends.push(Arc::new(Backend::new(
                    config.id.clone(),
                    config.url.clone(),
                    config.weight,
                )));
            }
        }
        pool
    }

    pub fn add_server(&self, backend: Arc<Backend>) -> Result<(), PoolError> {
        let mut inner = self.inner.write().unwrap();
        if inner.backends.iter().any(|b| b.id == backend.id) {
            return Err(PoolError::Duplicate(backend.id.clone()));
        }
        tracing::info!(backend = %backend.id, url = %backend.url, "backend added");
        inner.backends.push(backend);
        Ok(())
    }

    /// Removes by id; idempotent. Requests already holding the backend keep
    /// their own reference and run to completion.
    pub fn remove_server(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let before = inner.backends.len();
        inner.backends.retain(|b| b.id != id);
        let removed = inner.backends.len() != before;
        if removed {
            tracing::info!(backend = %id, "backend removed");
        }
        removed
    }

    pub fn get_servers(&self) -> Vec<Arc<Backend>> {
        self.inner.read().unwrap().backends.clone()
    }

    pub fn get_server(&self, id: &str) -> Option<Arc<Backend>> {
        self.inner
            .read()
            .unwrap()
            .backends
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    pub fn get_healthy(&self) -> Vec<Arc<Backend>> {
        self.inner
            .read()
            .unwrap()
            .backends
            .iter()
            .filter(|b| b.is_alive())
            .cloned()
            .collect()
    }

    /// Delegates to the active algorithm with a healthy snapshot and the
    /// current selection counter, all captured under one read of the lock.
    /// With `prefer_healthy` set, degraded backends are left out of the
    /// candidate set as long as at least one fully healthy backend exists.
    pub async fn select_backend(
        &self,
        client_addr: Option<IpAddr>,
        prefer_healthy: bool,
    ) -> Option<Arc<Backend>> {
        let (mut candidates, algorithm, counter) = {
            let inner = self.inner.read().unwrap();
            let healthy: Vec<Arc<Backend>> = inner
                .backends
                .iter()
                .filter(|b| b.is_alive())
                .cloned()
                .collect();
            (
                healthy,
                Arc::clone(&inner.algorithm),
                self.counter.load(Ordering::SeqCst),
            )
        };
        if prefer_healthy && candidates.iter().any(|b| b.is_healthy()) {
            candidates.retain(|b| b.is_healthy());
        }
        algorithm.select(&candidates, client_addr, counter).await
    }

    /// Advanced by the proxy handler only after a successful non-sticky
    /// selection.
    pub fn advance_counter(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn selection_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Swaps the algorithm; selections already in flight keep the instance
    /// they captured.
    pub fn set_algorithm(&self, algorithm: Arc<dyn Balancer>) {
        let mut inner = self.inner.write().unwrap();
        tracing::info!(from = inner.algorithm.name(), to = algorithm.name(), "algorithm changed");
        inner.algorithm = algorithm;
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.inner.read().unwrap().algorithm.name()
    }

    pub fn record_request(&self) {
        self.throughput.record();
    }

    pub fn total_requests(&self) -> u64 {
        self.throughput.total()
    }

    pub fn requests_per_second(&self) -> f64 {
        self.throughput.rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::RoundRobinBalancer;
    use crate::proxy::HealthStatus;
    use url::Url;

    fn pool() -> BackendPool {
        BackendPool::new(Arc::new(RoundRobinBalancer::new()))
    }

    fn backend(id: &str) -> Arc<Backend> {
        let url: Url = format!("http://10.0.0.{}:8080", id.len()).parse().unwrap();
        Arc::new(Backend::new(id, url, 1))
    }

    #[test]
    fn duplicate_ids_rejected() {
        let pool = pool();
        pool.add_server(backend("a")).unwrap();
        assert!(matches!(
            pool.add_server(backend("a")),
            Err(PoolError::Duplicate(_))
        ));
        assert_eq!(pool.get_servers().len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let pool = pool();
        pool.add_server(backend("a")).unwrap();
        assert!(pool.remove_server("a"));
        assert!(!pool.remove_server("a"));
    }

    #[test]
    fn add_then_remove_leaves_pool_unchanged() {
        let pool = pool();
        pool.add_server(backend("a")).unwrap();
        pool.add_server(backend("b")).unwrap();
        let before: Vec<String> = pool.get_servers().iter().map(|b| b.id.clone()).collect();

        pool.add_server(backend("tmp")).unwrap();
        assert!(pool.remove_server("tmp"));

        let after: Vec<String> = pool.get_servers().iter().map(|b| b.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn healthy_snapshot_filters_dead_backends() {
        let pool = pool();
        let a = backend("a");
        let b = backend("b");
        a.set_status(HealthStatus::Healthy);
        pool.add_server(a).unwrap();
        pool.add_server(b).unwrap();
        let healthy = pool.get_healthy();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "a");
    }

    #[tokio::test]
    async fn selection_never_returns_removed_backend() {
        let pool = pool();
        let a = backend("a");
        let b = backend("bb");
        a.set_status(HealthStatus::Healthy);
        b.set_status(HealthStatus::Healthy);
        pool.add_server(a).unwrap();
        pool.add_server(b).unwrap();
        pool.remove_server("a");
        for _ in 0..8 {
            let selected = pool.select_backend(None, false).await.unwrap();
            assert_eq!(selected.id, "bb");
            pool.advance_counter();
        }
    }

    #[tokio::test]
    async fn empty_pool_selects_nothing() {
        let pool = pool();
        assert!(pool.select_backend(None, false).await.is_none());
    }

    #[tokio::test]
    async fn prefer_healthy_skips_degraded_when_possible() {
        let pool = pool();
        let a = backend("a");
        let b = backend("bb");
        a.set_status(HealthStatus::Degraded);
        b.set_status(HealthStatus::Healthy);
        pool.add_server(a).unwrap();
        pool.add_server(b).unwrap();
        for _ in 0..4 {
            let selected = pool.select_backend(None, true).await.unwrap();
            assert_eq!(selected.id, "bb");
            pool.advance_counter();
        }
        // Without the preference, the degraded backend stays selectable.
        pool.set_algorithm(Arc::new(RoundRobinBalancer::new()));
        let ids: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..2 {
                out.push(pool.select_backend(None, false).await.unwrap().id.clone());
                pool.advance_counter();
            }
            out
        };
        assert!(ids.contains(&"a".to_string()));
    }
}
