// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

/// Top-level configuration file, camelCase on disk (YAML or JSON).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_lb_port")]
    pub load_balancer_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub load_balancing_algorithm: String,
    #[serde(default)]
    pub ssl_cert_path: String,
    #[serde(default)]
    pub ssl_key_path: String,
    #[serde(default)]
    pub backend_servers: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub sticky: StickyConfig,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
    #[serde(default)]
    pub l7_rules: Vec<RouteRuleConfig>,
    #[serde(default)]
    pub extra_pools: HashMap<String, Vec<BackendConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub id: String,
    pub url: Url,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default = "default_hc_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_hc_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_hc_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyConfig {
    #[serde(default = "default_cookie_ttl")]
    pub cookie_ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub prefer_healthy: bool,
}

/// One L7 routing rule. Every present predicate must match; the first
/// matching rule picks the pool for the request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRuleConfig {
    pub host: Option<String>,
    pub path_prefix: Option<String>,
    pub method: Option<String>,
    pub pool: String,
}

fn default_lb_port() -> u16 {
    8080
}

fn default_api_port() -> u16 {
    8081
}

fn default_weight() -> u32 {
    1
}

fn default_hc_interval() -> u64 {
    10
}

fn default_hc_timeout() -> u64 {
    5
}

fn default_hc_path() -> String {
    "/health".to_string()
}

fn default_cookie_ttl() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

fn default_drain_timeout() -> u64 {
    30
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_hc_interval(),
            timeout_seconds: default_hc_timeout(),
            path: default_hc_path(),
        }
    }
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            cookie_ttl_seconds: default_cookie_ttl(),
            prefer_healthy: default_true(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl StickyConfig {
    pub fn cookie_ttl(&self) -> Duration {
        Duration::from_secs(self.cookie_ttl_seconds)
    }
}

impl Config {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        validate_backends(&self.backend_servers)?;
        for (name, backends) in &self.extra_pools {
            if name.is_empty() {
                bail!("extra pool with empty name");
            }
            validate_backends(backends)?;
        }
        if self.health_check.interval_seconds == 0 {
            bail!("healthCheck.intervalSeconds must be positive");
        }
        if self.health_check.timeout_seconds == 0 {
            bail!("healthCheck.timeoutSeconds must be positive");
        }
        for rule in &self.l7_rules {
            if rule.pool != "default" && !self.extra_pools.contains_key(&rule.pool) {
                bail!("l7 rule references unknown pool '{}'", rule.pool);
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_backend_url(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" | "tcp" => {}
        other => bail!("unsupported backend scheme '{}'", other),
    }
    if url.host_str().is_none() {
        bail!("backend URL '{}' has no host", url);
    }
    Ok(())
}

fn validate_backends(backends: &[BackendConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for backend in backends {
        if backend.id.is_empty() {
            bail!("backend with empty id");
        }
        if !seen.insert(backend.id.as_str()) {
            bail!("duplicate backend id '{}'", backend.id);
        }
        validate_backend_url(&backend.url)?;
    }
    Ok(())
}
