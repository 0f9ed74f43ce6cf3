// src/proxy/proxy.rs
use super::backend::{Backend, ConnectionGuard};
use super::router::Router;
use super::sticky::StickySessions;
use crate::geo::GeoObserver;
use crate::metrics::MetricsCollector;
use futures::Stream;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, SET_COOKIE};
use hyper::http::uri::PathAndQuery;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use uuid::Uuid;

/// Hop-by-hop headers are stripped in both directions per RFC 7230 §6.1,
/// along with any header named by the Connection header itself.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Invalid upstream target: {0}")]
    BadTarget(String),
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoHealthyBackends => {
                (StatusCode::SERVICE_UNAVAILABLE, "No healthy backends available")
            }
            ProxyError::Upstream(_) | ProxyError::BadTarget(_) => {
                (StatusCode::BAD_GATEWAY, "Bad gateway")
            }
        };

        Response::builder()
            .status(status)
            .body(Body::from(message))
            .unwrap_or_default()
    }
}

/// End-to-end request path: sticky resolution, selection, connection
/// bookkeeping, forwarding, and error mapping. Transport failures surface as
/// 502 and are never retried; an empty healthy set surfaces as 503.
pub struct Proxy {
    router: Router,
    sticky: StickySessions,
    client: Client<HttpsConnector<HttpConnector>>,
    metrics: Arc<MetricsCollector>,
    geo: Option<GeoObserver>,
}

impl Proxy {
    pub fn new(router: Router, sticky: StickySessions, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            router,
            sticky,
            client: Client::builder().build(HttpsConnector::new()),
            metrics,
            geo: None,
        }
    }

    /// Attaches the best-effort geographic observer; lookups happen off the
    /// request path.
    pub fn with_geo(mut self, geo: GeoObserver) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn handle(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let method = req.method().to_string();
        let client_ip = client_addr.map(|a| a.ip());

        if let (Some(geo), Some(ip)) = (&self.geo, client_ip) {
            geo.observe(ip);
        }

        let pool = self.router.route(&req);
        let alive = pool.get_healthy();

        let (backend, newly_bound) = match self.sticky.resolve(&req, &alive) {
            Some(backend) => {
                tracing::debug!(%request_id, backend = %backend.id, "sticky hit");
                (backend, false)
            }
            None => {
                let selected = pool
                    .select_backend(client_ip, self.sticky.prefer_healthy())
                    .await;
                match selected {
                    Some(backend) => {
                        // The rotation only moves for non-sticky selections.
                        pool.advance_counter();
                        (backend, true)
                    }
                    None => return Err(ProxyError::NoHealthyBackends),
                }
            }
        };

        let guard = backend.track_connection();
        pool.record_request();
        self.metrics
            .update_backend_connections(&backend.id, backend.active_connections() as i64);

        let outbound = build_upstream_request(req, &backend, client_addr)?;
        tracing::debug!(%request_id, backend = %backend.id, uri = %outbound.uri(), "forwarding");

        let response = match self.client.request(outbound).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%request_id, backend = %backend.id, error = %e, "upstream failure");
                self.metrics.record_request(
                    &method,
                    StatusCode::BAD_GATEWAY.as_u16(),
                    &backend.id,
                    started.elapsed(),
                );
                return Err(ProxyError::Upstream(e.to_string()));
            }
        };

        let status = response.status();
        self.metrics
            .record_request(&method, status.as_u16(), &backend.id, started.elapsed());

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if newly_bound {
            if let Ok(cookie) = HeaderValue::from_str(&self.sticky.bind_header(&backend.id)) {
                parts.headers.append(SET_COOKIE, cookie);
            }
        }

        // The guard rides along with the body so the connection count drops
        // only once the response has been fully streamed back (or the client
        // went away).
        let body = Body::wrap_stream(TrackedBody {
            inner: body,
            _guard: guard,
        });
        Ok(Response::from_parts(parts, body))
    }
}

struct TrackedBody {
    inner: Body,
    _guard: ConnectionGuard,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, hyper::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn build_upstream_request(
    req: Request<Body>,
    backend: &Backend,
    client_addr: Option<SocketAddr>,
) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    strip_hop_by_hop(&mut parts.headers);

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let forwarded = match parts
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
    }

    parts.uri = upstream_uri(backend, parts.uri.path_and_query())?;
    Ok(Request::from_parts(parts, body))
}

/// Substitutes the backend as the request target: its scheme, authority and
/// path prefix, followed by the original path and query. `tcp` backends are
/// dialed as plain HTTP on the proxied path.
fn upstream_uri(backend: &Backend, path_and_query: Option<&PathAndQuery>) -> Result<Uri, ProxyError> {
    let scheme = match backend.url.scheme() {
        "https" => "https",
        _ => "http",
    };
    let host = backend
        .url
        .host_str()
        .ok_or_else(|| ProxyError::BadTarget(format!("backend '{}' has no host", backend.id)))?;

    let mut target = format!("{scheme}://{host}");
    if let Some(port) = backend.url.port() {
        target.push(':');
        target.push_str(&port.to_string());
    }
    let prefix = backend.url.path().trim_end_matches('/');
    target.push_str(prefix);
    match path_and_query {
        Some(pq) => target.push_str(pq.as_str()),
        None => target.push('/'),
    }

    target
        .parse::<Uri>()
        .map_err(|e| ProxyError::BadTarget(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
