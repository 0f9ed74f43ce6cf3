// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::handler::RequestHandler;
use anyhow::Result;
use hyper::server::conn::Http;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;

/// Builder so `main.rs` can inject the proxy handler and drain policy.
pub struct ServerBuilder {
    addr: SocketAddr,
    handler: Option<RequestHandler>,
    drain_timeout: Duration,
}

impl ServerBuilder {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handler: None,
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_handler(mut self, handler: RequestHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Accepts until `shutdown` resolves, then stops taking new connections
    /// and lets in-flight requests finish within the drain deadline. Whatever
    /// is still running after that is forcibly closed.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Same as `serve_until`, on an already-bound listener.
    pub async fn serve_on(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let handler = self
            .handler
            .ok_or_else(|| anyhow::anyhow!("handler must be set via with_handler()"))?;

        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        let mut connections: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let svc = handler.for_peer(peer);
                    connections.spawn(async move {
                        if let Err(err) = Http::new().serve_connection(stream, svc).await {
                            tracing::debug!(%peer, %err, "connection error");
                        }
                    });
                }
                // Reap finished connections so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }
        drop(listener);

        tracing::info!(
            in_flight = connections.len(),
            deadline = ?self.drain_timeout,
            "draining connections"
        );
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "drain deadline exceeded, closing remaining connections"
            );
            connections.abort_all();
        }
        Ok(())
    }
}
