// src/metrics/throughput.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the sliding sampling window.
const WINDOW_SECS: u64 = 60;

/// Pool-level throughput counters: a monotonic total plus a 60-second
/// sampling window used to derive requests-per-second. The window resets
/// through a compare-and-swap on its start second, so concurrent recorders
/// agree on exactly one reset.
#[derive(Debug)]
pub struct ThroughputStats {
    total: AtomicU64,
    window_start: AtomicU64,
    window_requests: AtomicU64,
}

impl ThroughputStats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            window_start: AtomicU64::new(epoch_secs()),
            window_requests: AtomicU64::new(0),
        }
    }

    /// Counts one routed request.
    pub fn record(&self) {
        self.record_at(epoch_secs());
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Requests per second over the current window. The first reading after
    /// a full window of silence reports zero.
    pub fn rate(&self) -> f64 {
        self.rate_at(epoch_secs())
    }

    fn record_at(&self, now: u64) {
        self.roll_window(now);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.window_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn rate_at(&self, now: u64) -> f64 {
        self.roll_window(now);
        let start = self.window_start.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(start).max(1);
        self.window_requests.load(Ordering::Relaxed) as f64 / elapsed as f64
    }

    fn roll_window(&self, now: u64) {
        let start = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= WINDOW_SECS
            && self
                .window_start
                .compare_exchange(start, now, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
        {
            self.window_requests.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ThroughputStats {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_monotonic() {
        let stats = ThroughputStats::new();
        for _ in 0..5 {
            stats.record_at(1_000);
        }
        assert_eq!(stats.total(), 5);
        stats.record_at(2_000);
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn rate_divides_by_elapsed_seconds() {
        let stats = ThroughputStats::new();
        let start = stats.window_start.load(Ordering::Relaxed);
        for _ in 0..30 {
            stats.record_at(start);
        }
        assert_eq!(stats.rate_at(start + 10), 3.0);
    }

    #[test]
    fn same_second_reads_divide_by_one() {
        let stats = ThroughputStats::new();
        let start = stats.window_start.load(Ordering::Relaxed);
        for _ in 0..7 {
            stats.record_at(start);
        }
        assert_eq!(stats.rate_at(start), 7.0);
    }

    #[test]
    fn window_resets_after_sixty_seconds() {
        let stats = ThroughputStats::new();
        let start = stats.window_start.load(Ordering::Relaxed);
        for _ in 0..10 {
            stats.record_at(start);
        }
        // First read after a full window of silence is zero.
        assert_eq!(stats.rate_at(start + WINDOW_SECS), 0.0);
        // The total is untouched by the reset.
        assert_eq!(stats.total(), 10);
    }

    #[test]
    fn recording_after_gap_starts_fresh_window() {
        let stats = ThroughputStats::new();
        let start = stats.window_start.load(Ordering::Relaxed);
        stats.record_at(start);
        let later = start + WINDOW_SECS + 5;
        stats.record_at(later);
        stats.record_at(later);
        assert_eq!(stats.rate_at(later), 2.0);
        assert_eq!(stats.total(), 3);
    }
}
