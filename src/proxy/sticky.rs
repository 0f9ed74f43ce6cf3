// src/proxy/sticky.rs
use super::backend::Backend;
use crate::config::StickyConfig;
use hyper::header::COOKIE;
use hyper::{Body, Request};
use std::sync::Arc;
use std::time::Duration;

/// Well-known affinity cookie name.
pub const STICKY_COOKIE: &str = "LB_STICKY_SERVER";

/// Cookie-scoped session affinity. Affinity is best effort: a cookie that
/// names a backend no longer alive is ignored and the client is rebound on
/// the selection path.
pub struct StickySessions {
    ttl: Duration,
    prefer_healthy: bool,
}

impl StickySessions {
    pub fn new(config: StickyConfig) -> Self {
        Self {
            ttl: config.cookie_ttl(),
            prefer_healthy: config.prefer_healthy,
        }
    }

    /// Whether fresh bindings should avoid degraded backends while a fully
    /// healthy one exists.
    pub fn prefer_healthy(&self) -> bool {
        self.prefer_healthy
    }

    /// Returns the backend the request is pinned to, iff the affinity cookie
    /// is present and the referenced backend is still in the alive set.
    pub fn resolve(&self, req: &Request<Body>, alive: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let id = cookie_value(req, STICKY_COOKIE)?;
        alive.iter().find(|b| b.id == id).cloned()
    }

    /// `Set-Cookie` header value binding the client to `backend_id`.
    pub fn bind_header(&self, backend_id: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            STICKY_COOKIE,
            backend_id,
            self.ttl.as_secs()
        )
    }
}

fn cookie_value(req: &Request<Body>, name: &str) -> Option<String> {
    for header in req.headers().get_all(COOKIE) {
        let raw = match header.to_str() {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
