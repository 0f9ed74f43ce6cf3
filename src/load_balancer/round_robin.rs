// src/load_balancer/round_robin.rs
use crate::load_balancer::Balancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Walks the healthy list in order. The counter is owned by the pool and
/// advanced by the proxy handler after each non-sticky selection, so a
/// sticky hit does not move the rotation.
pub struct RoundRobinBalancer;

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Balancer for RoundRobinBalancer {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        _client_addr: Option<IpAddr>,
        counter: u64,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let index = (counter % backends.len() as u64) as usize;
        Some(backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "roundrobin"
    }
}
