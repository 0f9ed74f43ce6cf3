// src/api/mod.rs
mod types;

pub use types::*;

use crate::config::validate_backend_url;
use crate::load_balancer::{create_balancer, Algorithm};
use crate::metrics::{MetricsCollector, MetricsRegistry};
use crate::proxy::{Backend, BackendPool};
use anyhow::{Context, Result};
use hyper::header::AUTHORIZATION;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Thin REST adapter over the default pool. Everything except `OPTIONS`
/// and the public ping/health/metrics paths requires the configured bearer
/// token; an empty configured key disables the check.
pub struct ApiServer {
    pool: Arc<BackendPool>,
    registry: Arc<MetricsRegistry>,
    metrics: Arc<MetricsCollector>,
    api_key: String,
}

impl ApiServer {
    pub fn new(pool: Arc<BackendPool>, registry: Arc<MetricsRegistry>, api_key: String) -> Self {
        let metrics = registry.collector();
        Self {
            pool,
            registry,
            metrics,
            api_key,
        }
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let api = self;
        let make_service = make_service_fn(move |_| {
            let api = api.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let api = api.clone();
                    async move { Ok::<_, Infallible>(api.dispatch(req).await) }
                }))
            }
        });

        info!("management API listening on {}", addr);
        Server::bind(&addr)
            .serve(make_service)
            .await
            .context("management API server failed")
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if method == Method::OPTIONS {
            return preflight();
        }
        if !self.is_public(&method, &segments) && !self.authorized(&req) {
            return error_response(StatusCode::UNAUTHORIZED, "invalid or missing API key");
        }

        match (method, segments.as_slice()) {
            (Method::GET, ["ping"]) => json(
                StatusCode::OK,
                &serde_json::json!({"message": "pong", "status": "ok"}),
            ),
            (Method::GET, ["health"]) => json(StatusCode::OK, &serde_json::json!({"status": "ok"})),
            (Method::GET, ["servers"]) => self.list_servers(),
            (Method::POST, ["servers"]) => self.create_server(req).await,
            (Method::PUT, ["servers", id]) => {
                let id = id.to_string();
                self.update_server(&id, req).await
            }
            (Method::DELETE, ["servers", id]) => self.delete_server(id),
            (Method::GET, ["config", "algorithm"]) => json(
                StatusCode::OK,
                &AlgorithmBody {
                    algorithm: self.pool.algorithm_name().to_string(),
                },
            ),
            (Method::PUT, ["config", "algorithm"]) => self.set_algorithm(req).await,
            (Method::GET, ["metrics"]) => self.metrics_snapshot(),
            (Method::GET, ["metrics", "prometheus"]) => {
                let body = self.registry.gather();
                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4")
                    .body(Body::from(body))
                    .unwrap_or_default()
            }
            _ => error_response(StatusCode::NOT_FOUND, "not found"),
        }
    }

    fn is_public(&self, method: &Method, segments: &[&str]) -> bool {
        matches!(
            (method, segments),
            (&Method::GET, ["ping"])
                | (&Method::GET, ["health"])
                | (&Method::GET, ["metrics"])
                | (&Method::GET, ["metrics", "prometheus"])
        )
    }

    fn authorized(&self, req: &Request<Body>) -> bool {
        if self.api_key.is_empty() {
            return true;
        }
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            == Some(self.api_key.as_str())
    }

    fn list_servers(&self) -> Response<Body> {
        let servers: Vec<_> = self
            .pool
            .get_servers()
            .iter()
            .map(|b| b.snapshot())
            .collect();
        json(StatusCode::OK, &servers)
    }

    async fn create_server(&self, req: Request<Body>) -> Response<Body> {
        let body: CreateServerRequest = match read_json(req).await {
            Ok(body) => body,
            Err(resp) => return resp,
        };
        if body.id.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "id must not be empty");
        }
        let url: Url = match body.url.parse() {
            Ok(url) => url,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("invalid URL: {e}")),
        };
        if let Err(e) = validate_backend_url(&url) {
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }

        let backend = Arc::new(Backend::new(body.id, url, body.weight));
        let snapshot = backend.snapshot();
        match self.pool.add_server(backend) {
            Ok(()) => json(StatusCode::CREATED, &snapshot),
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        }
    }

    async fn update_server(&self, id: &str, req: Request<Body>) -> Response<Body> {
        let body: UpdateServerRequest = match read_json(req).await {
            Ok(body) => body,
            Err(resp) => return resp,
        };
        let backend = match self.pool.get_server(id) {
            Some(backend) => backend,
            None => return error_response(StatusCode::NOT_FOUND, "unknown backend"),
        };
        if let Some(weight) = body.weight {
            backend.set_weight(weight);
        }
        if let Some(status) = body.health_status {
            backend.set_status(status);
        }
        json(StatusCode::OK, &backend.snapshot())
    }

    fn delete_server(&self, id: &str) -> Response<Body> {
        if self.pool.remove_server(id) {
            self.metrics.forget_backend(id);
            json(StatusCode::OK, &serde_json::json!({"status": "deleted"}))
        } else {
            error_response(StatusCode::NOT_FOUND, "unknown backend")
        }
    }

    async fn set_algorithm(&self, req: Request<Body>) -> Response<Body> {
        let body: AlgorithmBody = match read_json(req).await {
            Ok(body) => body,
            Err(resp) => return resp,
        };
        let algorithm: Algorithm = match body.algorithm.parse() {
            Ok(algorithm) => algorithm,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        self.pool.set_algorithm(create_balancer(algorithm));
        json(
            StatusCode::OK,
            &AlgorithmBody {
                algorithm: algorithm.as_str().to_string(),
            },
        )
    }

    fn metrics_snapshot(&self) -> Response<Body> {
        let view = MetricsView {
            total_requests: self.pool.total_requests(),
            requests_per_second: self.pool.requests_per_second(),
            backends: self
                .pool
                .get_servers()
                .iter()
                .map(|b| b.snapshot())
                .collect(),
        };
        json(StatusCode::OK, &view)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Body>,
) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}")))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json(
        status,
        &ErrorBody {
            error: message.to_string(),
        },
    )
}

fn preflight() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Allow", "GET, POST, PUT, DELETE, OPTIONS")
        .body(Body::empty())
        .unwrap_or_default()
}
