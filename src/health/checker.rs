// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool, HealthStatus};
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, Duration};
use tracing::{debug, info};

/// Active prober. One scheduled loop fans a probe out to every backend not
/// in maintenance; ticks never wait for stragglers, and a per-backend
/// in-flight gate keeps any single backend down to one concurrent probe.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pools: Vec<Arc<BackendPool>>,
    client: Client,
    metrics: Arc<MetricsCollector>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pools: Vec<Arc<BackendPool>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pools,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.config.interval(), "starting health checker");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_probes();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Stops scheduling new ticks. Probes already in flight are given their
    /// timeout budget and then abandoned.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn dispatch_probes(self: &Arc<Self>) {
        let mut alive = 0;
        let mut total = 0;
        for pool in &self.pools {
            let backends = pool.get_servers();
            alive += backends.iter().filter(|b| b.is_alive()).count();
            total += backends.len();
            for backend in backends {
                if backend.status() == HealthStatus::Maintenance {
                    continue;
                }
                if !backend.begin_probe() {
                    debug!(backend = %backend.id, "previous probe still in flight, skipping");
                    continue;
                }
                let checker = Arc::clone(self);
                tokio::spawn(async move {
                    checker.probe(&backend).await;
                    backend.finish_probe();
                });
            }
        }
        self.metrics.update_backend_counts(alive, total);
    }

    async fn probe(&self, backend: &Arc<Backend>) {
        let start = Instant::now();
        let result = match backend.url.scheme() {
            "http" | "https" => self.probe_http(backend).await,
            _ => self.probe_tcp(backend).await,
        };
        let elapsed = start.elapsed();

        match result {
            Ok(()) => backend.apply_probe(elapsed, HealthStatus::Healthy),
            Err(reason) => {
                debug!(backend = %backend.id, %reason, "probe failed");
                backend.apply_probe(elapsed, HealthStatus::Unhealthy);
            }
        }
        self.metrics
            .update_backend_health(&backend.id, backend.is_alive());
    }

    async fn probe_http(&self, backend: &Backend) -> Result<(), String> {
        let target = probe_url(backend, &self.config.path);
        let result = timeout(self.config.timeout(), self.client.get(&target).send()).await;

        match result {
            Ok(Ok(response)) if response.status() == reqwest::StatusCode::OK => Ok(()),
            Ok(Ok(response)) => Err(format!("HTTP {}", response.status())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("probe timeout".to_string()),
        }
    }

    async fn probe_tcp(&self, backend: &Backend) -> Result<(), String> {
        let host = backend
            .url
            .host_str()
            .ok_or_else(|| "backend URL has no host".to_string())?;
        let port = backend
            .url
            .port_or_known_default()
            .ok_or_else(|| "backend URL has no port".to_string())?;

        match timeout(self.config.timeout(), TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("probe timeout".to_string()),
        }
    }
}

fn probe_url(backend: &Backend, path: &str) -> String {
    let base = backend.url.as_str().trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
