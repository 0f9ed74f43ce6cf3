// src/load_balancer/least_connections.rs
use crate::load_balancer::Balancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Picks the backend with the fewest in-flight requests at snapshot time.
/// Ties go to the earliest entry in the list.
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnectionsBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Balancer for LeastConnectionsBalancer {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        _client_addr: Option<IpAddr>,
        _counter: u64,
    ) -> Option<Arc<Backend>> {
        backends
            .iter()
            .min_by_key(|b| b.active_connections())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "leastconnections"
    }
}
