use std::sync::atomic::{AtomicU64, Ordering};

/// Producer and transmit progress, in cumulative record bytes.
///
/// Expected ordering is `forwarded >= sent >= written`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowControlContext {
    pub forwarded: u64,
    pub sent: u64,
    pub written: u64,
    /// Set once a flush was requested; the gate never pauses afterwards.
    pub finalizing: bool,
}

impl FlowControlContext {
    /// Bytes accepted from the producer that the server has not written yet.
    pub fn backlog(&self) -> u64 {
        self.forwarded.saturating_sub(self.written)
    }

    /// Same context with `sent`/`written` taken from `observed`.
    pub fn observe(self, observed: &ProgressSnapshot) -> Self {
        Self {
            sent: observed.sent,
            written: observed.written,
            ..self
        }
    }
}

/// Lock-free progress counters shared between the gate and the pipeline.
///
/// Each counter has exactly one writer: the gate adds to `forwarded`, the
/// transmit stage adds to `sent` and `written`.
#[derive(Debug, Default)]
pub struct Progress {
    forwarded: AtomicU64,
    sent: AtomicU64,
    written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub forwarded: u64,
    pub sent: u64,
    pub written: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_forwarded(&self, bytes: u64) {
        self.forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_written(&self, bytes: u64) {
        self.written.fetch_add(bytes, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Acquire),
        }
    }
}
