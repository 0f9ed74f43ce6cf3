// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Shared contract for every selection policy: given a healthy snapshot, the
/// client address and the pool's monotonic selection counter, return one
/// backend. An empty snapshot yields `None`.
#[async_trait]
pub trait Balancer: Send + Sync {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        client_addr: Option<IpAddr>,
        counter: u64,
    ) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
