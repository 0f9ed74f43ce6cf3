// src/main.rs
use anyhow::Result;
use junction::api::ApiServer;
use junction::config;
use junction::health::HealthChecker;
use junction::load_balancer::{create_balancer, Algorithm};
use junction::metrics::MetricsRegistry;
use junction::proxy::{BackendPool, Proxy, RouteRule, Router, StickySessions};
use junction::server::{RequestHandler, ServerBuilder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("junction=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    if !config.ssl_cert_path.is_empty() || !config.ssl_key_path.is_empty() {
        warn!("sslCertPath/sslKeyPath set but TLS termination is not built in; serving plain HTTP");
    }

    // Initialize metrics
    let registry = Arc::new(MetricsRegistry::new()?);
    let metrics = registry.collector();

    // Build the pools and the L7 router
    let algorithm = Algorithm::from_config(&config.load_balancing_algorithm);
    info!(algorithm = algorithm.as_str(), "selection algorithm");
    let default_pool = Arc::new(BackendPool::from_configs(
        &config.backend_servers,
        create_balancer(algorithm),
    ));
    let mut pools = HashMap::new();
    for (name, backends) in &config.extra_pools {
        pools.insert(
            name.clone(),
            Arc::new(BackendPool::from_configs(backends, create_balancer(algorithm))),
        );
    }
    let rules = config
        .l7_rules
        .iter()
        .map(RouteRule::from_config)
        .collect::<Result<Vec<_>>>()?;
    let router = Router::with_rules(Arc::clone(&default_pool), pools, rules);

    // Start the health prober
    let checker = Arc::new(HealthChecker::new(
        config.health_check.clone(),
        router.all_pools(),
        metrics.clone(),
    ));
    tokio::spawn(Arc::clone(&checker).start());

    // Start the management API
    let api = Arc::new(ApiServer::new(
        default_pool,
        Arc::clone(&registry),
        config.api_key.clone(),
    ));
    let api_addr: SocketAddr = ([0, 0, 0, 0], config.api_port).into();
    tokio::spawn(async move {
        if let Err(e) = api.serve(api_addr).await {
            error!(%e, "management API failed");
        }
    });

    // Start the client-facing proxy
    let proxy = Arc::new(Proxy::new(
        router,
        StickySessions::new(config.sticky.clone()),
        metrics,
    ));
    let handler = RequestHandler::new(proxy);

    let addr: SocketAddr = ([0, 0, 0, 0], config.load_balancer_port).into();
    info!("Starting load balancer on {}", addr);

    let prober = Arc::clone(&checker);
    ServerBuilder::new(addr)
        .with_handler(handler)
        .with_drain_timeout(config.drain_timeout())
        .serve_until(async move {
            shutdown_signal().await;
            // The prober stops as soon as the drain begins.
            prober.shutdown();
        })
        .await
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
