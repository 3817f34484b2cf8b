//! Per-instance server counters.
//!
//! Created when the gateway starts and dropped when it stops, so uptime
//! restarts from zero on `restart` and two gateways in one process never
//! share counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    requests: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests: AtomicU64::new(0),
        }
    }

    /// Time since this instance was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Count one request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests counted so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests() {
        let stats = ServerStats::new();
        assert_eq!(stats.request_count(), 0);

        stats.record_request();
        stats.record_request();
        assert_eq!(stats.request_count(), 2);
    }
}
