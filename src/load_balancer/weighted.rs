// src/load_balancer/weighted.rs
use crate::load_balancer::Balancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;

/// Smooth weighted round robin. Every selection adds each backend's weight
/// to its running score, picks the highest score, then subtracts the weight
/// total from the winner. Weights {5, 1, 1} interleave as
/// A A B A C A A instead of serving the heavy backend in one long run.
///
/// The score map is keyed by backend id and guarded by its own mutex; ids
/// that have left the pool are dropped on the next selection pass.
pub struct WeightedBalancer {
    scores: Mutex<HashMap<String, i64>>,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WeightedBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Balancer for WeightedBalancer {
    async fn select(
        &self,
        backends: &[Arc<Backend>],
        _client_addr: Option<IpAddr>,
        _counter: u64,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let mut scores = self.scores.lock().unwrap();
        scores.retain(|id, _| backends.iter().any(|b| &b.id == id));

        let mut total: i64 = 0;
        for backend in backends {
            let weight = backend.weight() as i64;
            if weight == 0 {
                continue;
            }
            *scores.entry(backend.id.clone()).or_insert(0) += weight;
            total += weight;
        }
        if total == 0 {
            // All weights zero: deterministic fallback.
            return backends.first().cloned();
        }

        let mut winner: Option<&Arc<Backend>> = None;
        let mut best = i64::MIN;
        for backend in backends {
            if backend.weight() == 0 {
                continue;
            }
            let score = scores[&backend.id];
            if score > best {
                best = score;
                winner = Some(backend);
            }
        }

        let winner = winner?;
        *scores.get_mut(&winner.id).unwrap() -= total;
        Some(Arc::clone(winner))
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_util::{alive_backends, weighted_backends};

    async fn sequence(balancer: &WeightedBalancer, backends: &[Arc<Backend>], n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(balancer.select(backends, None, 0).await.unwrap().id.clone());
        }
        out
    }

    #[tokio::test]
    async fn classic_smooth_sequence() {
        let backends = weighted_backends(&[("a", 5), ("b", 1), ("c", 1)]);
        let balancer = WeightedBalancer::new();
        let picked = sequence(&balancer, &backends, 7).await;
        assert_eq!(picked, ["a", "a", "b", "a", "c", "a", "a"]);
    }

    #[tokio::test]
    async fn each_cycle_matches_weights() {
        let backends = weighted_backends(&[("a", 5), ("b", 1), ("c", 1)]);
        let balancer = WeightedBalancer::new();
        let picked = sequence(&balancer, &backends, 14).await;
        for window in [&picked[..7], &picked[7..]] {
            assert_eq!(window.iter().filter(|id| *id == "a").count(), 5);
            assert_eq!(window.iter().filter(|id| *id == "b").count(), 1);
            assert_eq!(window.iter().filter(|id| *id == "c").count(), 1);
        }
        // No run of three straight picks of the heavy backend.
        assert!(!picked.windows(3).any(|w| w.iter().all(|id| id == "a")));
    }

    #[tokio::test]
    async fn zero_weight_backends_receive_nothing() {
        let backends = weighted_backends(&[("a", 0), ("b", 2)]);
        let balancer = WeightedBalancer::new();
        for id in sequence(&balancer, &backends, 6).await {
            assert_eq!(id, "b");
        }
    }

    #[tokio::test]
    async fn all_zero_weights_fall_back_to_first() {
        let backends = weighted_backends(&[("a", 0), ("b", 0)]);
        let balancer = WeightedBalancer::new();
        let selected = balancer.select(&backends, None, 0).await.unwrap();
        assert_eq!(selected.id, "a");
    }

    #[tokio::test]
    async fn departed_ids_are_evicted() {
        let backends = weighted_backends(&[("a", 3), ("b", 1)]);
        let balancer = WeightedBalancer::new();
        sequence(&balancer, &backends, 4).await;
        let survivors = alive_backends(&["b"]);
        balancer.select(&survivors, None, 0).await.unwrap();
        let scores = balancer.scores.lock().unwrap();
        assert!(!scores.contains_key("a"));
    }
}
