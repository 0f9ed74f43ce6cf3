// src/geo/mod.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Resolves a client address to a country code. The real lookup service
/// lives outside this crate; anything implementing this trait can be
/// plugged in.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn country(&self, ip: IpAddr) -> Option<String>;
}

#[derive(Debug, Clone)]
struct CountryEntry {
    requests: u64,
    last_seen: u64,
}

/// Per-country request counters, capped at a fixed number of entries with
/// least-recently-seen eviction so an open-ended client population cannot
/// grow the map without bound.
pub struct GeoStats {
    entries: Mutex<HashMap<String, CountryEntry>>,
    capacity: usize,
    clock: AtomicU64,
}

impl GeoStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn record(&self, country: &str) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(country.to_string())
            .or_insert(CountryEntry {
                requests: 0,
                last_seen: tick,
            });
        entry.requests += 1;
        entry.last_seen = tick;

        while entries.len() > self.capacity {
            let stalest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(country, _)| country.clone());
            match stalest {
                Some(country) => {
                    entries.remove(&country);
                }
                None => break,
            }
        }
    }

    /// Countries and request counts, busiest first.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let entries = self.entries.lock().unwrap();
        let mut out: Vec<(String, u64)> = entries
            .iter()
            .map(|(country, e)| (country.clone(), e.requests))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

/// Feeds client addresses to a resolver worker through a bounded queue.
/// `observe` never blocks: when the queue is full the sample is dropped,
/// which is fine for best-effort reporting.
pub struct GeoObserver {
    tx: mpsc::Sender<IpAddr>,
    stats: Arc<GeoStats>,
}

impl GeoObserver {
    pub fn spawn(
        resolver: Arc<dyn GeoResolver>,
        queue_capacity: usize,
        country_capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(GeoStats::new(country_capacity));
        let worker_stats = Arc::clone(&stats);
        // The worker exits when the observer (and thus the sender) is
        // dropped.
        tokio::spawn(async move {
            while let Some(ip) = rx.recv().await {
                if let Some(country) = resolver.country(ip).await {
                    worker_stats.record(&country);
                }
            }
        });
        Self { tx, stats }
    }

    pub fn observe(&self, ip: IpAddr) {
        if self.tx.try_send(ip).is_err() {
            tracing::trace!(%ip, "geo queue full, sample dropped");
        }
    }

    pub fn stats(&self) -> Arc<GeoStats> {
        Arc::clone(&self.stats)
    }
}
