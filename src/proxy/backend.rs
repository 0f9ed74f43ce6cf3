// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Maintenance,
}

impl HealthStatus {
    /// Eligible for selection.
    pub fn is_alive(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

#[derive(Debug)]
struct ProbeState {
    status: HealthStatus,
    last_latency: Duration,
    last_transition: DateTime<Utc>,
}

/// One upstream target. Counters are atomics; status, probe latency and the
/// transition timestamp stay coherent under a single short lock.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    weight: AtomicU32,
    active_connections: AtomicU64,
    probe: RwLock<ProbeState>,
    probe_in_flight: AtomicBool,
}

impl Backend {
    /// New backends start unhealthy until the first successful probe.
    pub fn new(id: impl Into<String>, url: Url, weight: u32) -> Self {
        Self {
            id: id.into(),
            url,
            weight: AtomicU32::new(weight),
            active_connections: AtomicU64::new(0),
            probe: RwLock::new(ProbeState {
                status: HealthStatus::Unhealthy,
                last_latency: Duration::ZERO,
                last_transition: Utc::now(),
            }),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        self.probe.read().unwrap().status
    }

    pub fn is_alive(&self) -> bool {
        self.status().is_alive()
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Writes status and the transition timestamp together. Logs once per
    /// alive ↔ not-alive category change; same-status writes are silent.
    pub fn set_status(&self, new: HealthStatus) {
        let mut probe = self.probe.write().unwrap();
        if probe.status == new {
            return;
        }
        let was_alive = probe.status.is_alive();
        probe.status = new;
        probe.last_transition = Utc::now();
        if was_alive != new.is_alive() {
            if new.is_alive() {
                tracing::info!(backend = %self.id, status = ?new, "backend is up");
            } else {
                tracing::warn!(backend = %self.id, status = ?new, "backend is down");
            }
        }
    }

    /// Records one probe outcome. Latency is kept whether the probe succeeded
    /// or failed; the status write is skipped while the operator holds the
    /// backend in maintenance.
    pub fn apply_probe(&self, latency: Duration, outcome: HealthStatus) {
        {
            let mut probe = self.probe.write().unwrap();
            probe.last_latency = latency;
            if probe.status == HealthStatus::Maintenance {
                return;
            }
        }
        self.set_status(outcome);
    }

    pub fn response_time(&self) -> Duration {
        self.probe.read().unwrap().last_latency
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.probe.read().unwrap().last_transition
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Saturates at zero.
    pub fn decrement_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
    }

    /// Increments the in-flight gauge and hands back a guard that decrements
    /// it when dropped, i.e. once the proxied response body has been fully
    /// streamed or the request failed.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.increment_connections();
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }

    /// Claims the single probe slot for this backend. Returns false while a
    /// previous probe is still in flight.
    pub fn begin_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish_probe(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        let probe = self.probe.read().unwrap();
        BackendSnapshot {
            id: self.id.clone(),
            url: self.url.to_string(),
            weight: self.weight(),
            health_status: probe.status,
            active_connections: self.active_connections(),
            response_time_ms: probe.last_latency.as_millis() as u64,
        }
    }
}

pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_connections();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub health_status: HealthStatus,
    pub active_connections: u64,
    pub response_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn backend() -> Backend {
        Backend::new("b1", "http://10.0.0.1:8080".parse().unwrap(), 1)
    }

    #[test]
    fn starts_unhealthy() {
        let b = backend();
        assert_eq!(b.status(), HealthStatus::Unhealthy);
        assert!(!b.is_alive());
    }

    #[test]
    fn degraded_counts_as_alive() {
        let b = backend();
        b.set_status(HealthStatus::Degraded);
        assert!(b.is_alive());
        assert!(!b.is_healthy());
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let b = backend();
        b.decrement_connections();
        assert_eq!(b.active_connections(), 0);
        b.increment_connections();
        b.decrement_connections();
        b.decrement_connections();
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn probe_never_overwrites_maintenance() {
        let b = backend();
        b.set_status(HealthStatus::Maintenance);
        b.apply_probe(Duration::from_millis(3), HealthStatus::Healthy);
        assert_eq!(b.status(), HealthStatus::Maintenance);
        // latency is still recorded
        assert_eq!(b.response_time(), Duration::from_millis(3));
    }

    #[test]
    fn same_status_write_keeps_transition_time() {
        let b = backend();
        b.set_status(HealthStatus::Healthy);
        let first = b.last_transition();
        b.set_status(HealthStatus::Healthy);
        assert_eq!(b.last_transition(), first);
    }

    #[test]
    fn guard_decrements_on_drop() {
        let b = Arc::new(backend());
        let guard = b.track_connection();
        assert_eq!(b.active_connections(), 1);
        drop(guard);
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn probe_slot_is_exclusive() {
        let b = backend();
        assert!(b.begin_probe());
        assert!(!b.begin_probe());
        b.finish_probe();
        assert!(b.begin_probe());
    }

    proptest! {
        #[test]
        fn connections_never_go_negative(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let b = backend();
            let mut expected: u64 = 0;
            for inc in ops {
                if inc {
                    b.increment_connections();
                    expected += 1;
                } else {
                    b.decrement_connections();
                    expected = expected.saturating_sub(1);
                }
                prop_assert_eq!(b.active_connections(), expected);
            }
        }
    }
}
