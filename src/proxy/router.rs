// src/proxy/router.rs
use super::pool::BackendPool;
use crate::config::RouteRuleConfig;
use anyhow::{Context, Result};
use hyper::header::HOST;
use hyper::{Body, Method, Request};
use std::collections::HashMap;
use std::sync::Arc;

/// One L7 routing rule. Predicates that are present must all match; the
/// first matching rule substitutes its pool for the request.
pub struct RouteRule {
    host: Option<String>,
    path_prefix: Option<String>,
    method: Option<Method>,
    pool: String,
}

impl RouteRule {
    pub fn from_config(config: &RouteRuleConfig) -> Result<Self> {
        let method = config
            .method
            .as_deref()
            .map(|m| m.to_uppercase().parse::<Method>())
            .transpose()
            .with_context(|| format!("invalid method in l7 rule for pool '{}'", config.pool))?;
        Ok(Self {
            host: config.host.as_ref().map(|h| h.to_lowercase()),
            path_prefix: config.path_prefix.clone(),
            method,
            pool: config.pool.clone(),
        })
    }

    fn matches(&self, req: &Request<Body>) -> bool {
        if let Some(method) = &self.method {
            if req.method() != method {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !req.uri().path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(host) = &self.host {
            let request_host = req
                .headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h).to_lowercase());
            if request_host.as_deref() != Some(host.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Maps a request to a backend pool: rules are scanned in order, first match
/// wins, anything else lands on the default pool.
pub struct Router {
    default_pool: Arc<BackendPool>,
    pools: HashMap<String, Arc<BackendPool>>,
    rules: Vec<RouteRule>,
}

impl Router {
    pub fn new(default_pool: Arc<BackendPool>) -> Self {
        Self {
            default_pool,
            pools: HashMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_rules(
        default_pool: Arc<BackendPool>,
        pools: HashMap<String, Arc<BackendPool>>,
        rules: Vec<RouteRule>,
    ) -> Self {
        Self {
            default_pool,
            pools,
            rules,
        }
    }

    pub fn route(&self, req: &Request<Body>) -> Arc<BackendPool> {
        for rule in &self.rules {
            if rule.matches(req) {
                if let Some(pool) = self.pools.get(&rule.pool) {
                    return Arc::clone(pool);
                }
                return Arc::clone(&self.default_pool);
            }
        }
        Arc::clone(&self.default_pool)
    }

    pub fn default_pool(&self) -> Arc<BackendPool> {
        Arc::clone(&self.default_pool)
    }

    /// Default pool plus every named pool; the health prober walks all of
    /// them.
    pub fn all_pools(&self) -> Vec<Arc<BackendPool>> {
        let mut pools = vec![Arc::clone(&self.default_pool)];
        pools.extend(self.pools.values().cloned());
        pools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{create_balancer, Algorithm};

    fn pool() -> Arc<BackendPool> {
        Arc::new(BackendPool::new(create_balancer(Algorithm::RoundRobin)))
    }

    fn rule(config: RouteRuleConfig) -> RouteRule {
        RouteRule::from_config(&config).unwrap()
    }

    fn request(method: Method, uri: &str, host: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn unmatched_requests_use_default_pool() {
        let default_pool = pool();
        let api_pool = pool();
        let mut pools = HashMap::new();
        pools.insert("api".to_string(), Arc::clone(&api_pool));
        let router = Router::with_rules(
            Arc::clone(&default_pool),
            pools,
            vec![rule(RouteRuleConfig {
                host: None,
                path_prefix: Some("/api".to_string()),
                method: None,
                pool: "api".to_string(),
            })],
        );

        let routed = router.route(&request(Method::GET, "/home", None));
        assert!(Arc::ptr_eq(&routed, &default_pool));
        let routed = router.route(&request(Method::GET, "/api/users", None));
        assert!(Arc::ptr_eq(&routed, &api_pool));
    }

    #[test]
    fn first_matching_rule_wins() {
        let default_pool = pool();
        let first = pool();
        let second = pool();
        let mut pools = HashMap::new();
        pools.insert("first".to_string(), Arc::clone(&first));
        pools.insert("second".to_string(), Arc::clone(&second));
        let router = Router::with_rules(
            default_pool,
            pools,
            vec![
                rule(RouteRuleConfig {
                    host: None,
                    path_prefix: Some("/v1".to_string()),
                    method: None,
                    pool: "first".to_string(),
                }),
                rule(RouteRuleConfig {
                    host: None,
                    path_prefix: Some("/v1/users".to_string()),
                    method: None,
                    pool: "second".to_string(),
                }),
            ],
        );
        let routed = router.route(&request(Method::GET, "/v1/users", None));
        assert!(Arc::ptr_eq(&routed, &first));
    }

    #[test]
    fn all_predicates_must_match() {
        let default_pool = pool();
        let api_pool = pool();
        let mut pools = HashMap::new();
        pools.insert("api".to_string(), Arc::clone(&api_pool));
        let router = Router::with_rules(
            Arc::clone(&default_pool),
            pools,
            vec![rule(RouteRuleConfig {
                host: Some("api.example.com".to_string()),
                path_prefix: Some("/v2".to_string()),
                method: Some("POST".to_string()),
                pool: "api".to_string(),
            })],
        );

        let hit = request(Method::POST, "/v2/widgets", Some("api.example.com:8080"));
        assert!(Arc::ptr_eq(&router.route(&hit), &api_pool));

        let wrong_method = request(Method::GET, "/v2/widgets", Some("api.example.com"));
        assert!(Arc::ptr_eq(&router.route(&wrong_method), &default_pool));

        let wrong_host = request(Method::POST, "/v2/widgets", Some("www.example.com"));
        assert!(Arc::ptr_eq(&router.route(&wrong_host), &default_pool));
    }

    #[test]
    fn invalid_method_in_rule_is_rejected() {
        let config = RouteRuleConfig {
            host: None,
            path_prefix: None,
            method: Some("NOT A METHOD".to_string()),
            pool: "api".to_string(),
        };
        assert!(RouteRule::from_config(&config).is_err());
    }
}
