// src/load_balancer/ip_hash.rs
use crate::load_balancer::Balancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Hashes the client address so the same client lands on the same backend
/// while the healthy set is stable. Membership changes may remap clients;
/// there is no consistent hashing here.
pub struct IpHashBalancer;

impl IpHashBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IpHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a, 32-bit.
fn fnv1a(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[async_trait]
impl Balancer for IpHashBalancer {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        client_addr: Option<IpAddr>,
        _counter: u64,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        // Unknown clients all hash the empty string, which is still stable.
        let key = client_addr.map(|ip| ip.to_string()).unwrap_or_default();
        let index = (fnv1a(&key) as usize) % backends.len();
        Some(backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "iphash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_util::alive_backends;

    #[tokio::test]
    async fn same_client_same_backend() {
        let backends = alive_backends(&["a", "b", "c"]);
        let balancer = IpHashBalancer::new();
        let client: IpAddr = "203.0.113.7".parse().unwrap();
        let first = balancer.select(&backends, Some(client), 0).await.unwrap();
        for _ in 0..10 {
            let again = balancer.select(&backends, Some(client), 99).await.unwrap();
            assert_eq!(again.id, first.id);
        }
    }

    #[tokio::test]
    async fn different_clients_spread_out() {
        let backends = alive_backends(&["a", "b", "c", "d", "e"]);
        let balancer = IpHashBalancer::new();
        let mut seen = std::collections::HashSet::new();
        for octet in 1..=50u8 {
            let client: IpAddr = format!("198.51.100.{octet}").parse().unwrap();
            let selected = balancer.select(&backends, Some(client), 0).await.unwrap();
            seen.insert(selected.id.clone());
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn fnv1a_reference_values() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv1a(""), 0x811c_9dc5);
        assert_eq!(fnv1a("a"), 0xe40c_292c);
    }
}
