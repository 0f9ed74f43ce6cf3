// src/load_balancer/mod.rs
mod algorithm;
mod ip_hash;
mod least_connections;
mod round_robin;
mod weighted;
mod weighted_random;

pub use algorithm::Balancer;
pub use ip_hash::IpHashBalancer;
pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedBalancer;
pub use weighted_random::WeightedRandomBalancer;

use std::str::FromStr;
use std::sync::Arc;

/// The closed set of selection policies, by their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    IpHash,
    Weighted,
    WeightedRandom,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown algorithm '{0}'")]
pub struct UnknownAlgorithm(String);

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "roundrobin",
            Algorithm::LeastConnections => "leastconnections",
            Algorithm::IpHash => "iphash",
            Algorithm::Weighted => "weighted",
            Algorithm::WeightedRandom => "weightedrandom",
        }
    }

    /// Lenient variant for config files: unknown names fall back to round
    /// robin with a warning instead of failing startup.
    pub fn from_config(name: &str) -> Self {
        if name.is_empty() {
            return Algorithm::RoundRobin;
        }
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(algorithm = name, "unknown algorithm in config, using roundrobin");
            Algorithm::RoundRobin
        })
    }
}

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roundrobin" => Ok(Algorithm::RoundRobin),
            "leastconnections" => Ok(Algorithm::LeastConnections),
            "iphash" => Ok(Algorithm::IpHash),
            "weighted" => Ok(Algorithm::Weighted),
            "weightedrandom" => Ok(Algorithm::WeightedRandom),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

pub fn create_balancer(algorithm: Algorithm) -> Arc<dyn Balancer> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        Algorithm::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
        Algorithm::IpHash => Arc::new(IpHashBalancer::new()),
        Algorithm::Weighted => Arc::new(WeightedBalancer::new()),
        Algorithm::WeightedRandom => Arc::new(WeightedRandomBalancer::new()),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::proxy::{Backend, HealthStatus};
    use std::sync::Arc;
    use url::Url;

    pub fn weighted_backends(specs: &[(&str, u32)]) -> Vec<Arc<Backend>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, (id, weight))| {
                let url: Url = format!("http://10.0.0.{}:8080", i + 1).parse().unwrap();
                let backend = Backend::new(*id, url, *weight);
                backend.set_status(HealthStatus::Healthy);
                Arc::new(backend)
            })
            .collect()
    }

    pub fn alive_backends(ids: &[&str]) -> Vec<Arc<Backend>> {
        weighted_backends(&ids.iter().map(|id| (*id, 1)).collect::<Vec<_>>())
    }
}
