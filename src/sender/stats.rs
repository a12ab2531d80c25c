// Lock-free uplink statistics using atomic operations

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters shared by every stage of one stream.
#[derive(Debug, Default)]
pub struct UplinkStats {
    requests_attempted: AtomicU64,
    heartbeats: AtomicU64,
    bytes_sent: AtomicU64,
    failed_requests: AtomicU64,
    updates_applied: AtomicU64,
    updates_discarded: AtomicU64,
    pauses: AtomicU64,
    last_request_time: AtomicU64,
}

impl UplinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request handed to the transport
    pub fn record_request(&self, bytes: u64) {
        self.requests_attempted.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.last_request_time.store(now, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_request(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an update dropped because the stream is dead or stopping
    pub fn record_update_discarded(&self) {
        self.updates_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UplinkStatsSnapshot {
        UplinkStatsSnapshot {
            requests_attempted: self.requests_attempted.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            updates_discarded: self.updates_discarded.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
            last_request_time: self.last_request_time.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkStatsSnapshot {
    pub requests_attempted: u64,
    pub heartbeats: u64,
    pub bytes_sent: u64,
    pub failed_requests: u64,
    pub updates_applied: u64,
    pub updates_discarded: u64,
    pub pauses: u64,
    /// Unix seconds of the last request, 0 if none.
    pub last_request_time: u64,
}

impl UplinkStatsSnapshot {
    /// Calculate success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.requests_attempted == 0 {
            return 1.0;
        }
        (self.requests_attempted.saturating_sub(self.failed_requests) as f64)
            / (self.requests_attempted as f64)
    }
}
