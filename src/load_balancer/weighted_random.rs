// src/load_balancer/weighted_random.rs
use crate::load_balancer::Balancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;

/// Draws a point in `[0, total_weight)` and walks the list subtracting
/// weights until the draw lands inside a backend's share.
pub struct WeightedRandomBalancer;

impl WeightedRandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WeightedRandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Balancer for WeightedRandomBalancer {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        _client_addr: Option<IpAddr>,
        _counter: u64,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let total: u64 = backends.iter().map(|b| b.weight() as u64).sum();
        if total == 0 {
            // All weights zero: deterministic fallback.
            return backends.first().cloned();
        }
        let mut draw = rand::thread_rng().gen_range(0..total);
        for backend in backends {
            let weight = backend.weight() as u64;
            if draw < weight {
                return Some(Arc::clone(backend));
            }
            draw -= weight;
        }
        backends.last().cloned()
    }

    fn name(&self) -> &'static str {
        "weightedrandom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_util::weighted_backends;

    #[tokio::test]
    async fn zero_weight_backends_are_never_drawn() {
        let backends = weighted_backends(&[("a", 0), ("b", 1), ("c", 0)]);
        let balancer = WeightedRandomBalancer::new();
        for _ in 0..50 {
            let selected = balancer.select(&backends, None, 0).await.unwrap();
            assert_eq!(selected.id, "b");
        }
    }

    #[tokio::test]
    async fn all_zero_weights_fall_back_to_first() {
        let backends = weighted_backends(&[("a", 0), ("b", 0)]);
        let balancer = WeightedRandomBalancer::new();
        let selected = balancer.select(&backends, None, 0).await.unwrap();
        assert_eq!(selected.id, "a");
    }

    #[tokio::test]
    async fn heavy_backend_dominates() {
        let backends = weighted_backends(&[("a", 99), ("b", 1)]);
        let balancer = WeightedRandomBalancer::new();
        let mut a_hits = 0;
        for _ in 0..200 {
            if balancer.select(&backends, None, 0).await.unwrap().id == "a" {
                a_hits += 1;
            }
        }
        assert!(a_hits > 150);
    }
}
