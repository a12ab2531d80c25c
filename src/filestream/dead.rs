use crate::domain::UplinkError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Terminal "stop sending" flag shared by every stage of one stream.
///
/// Once set it never clears. It is narrower than cancellation: a dead stream
/// keeps draining its queues, it just never issues another request.
#[derive(Debug, Clone, Default)]
pub struct DeadLatch {
    dead: Arc<AtomicBool>,
}

impl DeadLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Marks the stream dead. Only the call that flips the latch logs.
    ///
    /// Returns whether this call was the one that killed the stream.
    pub fn log_fatal_and_stop_working(&self, err: &UplinkError) -> bool {
        if self.dead.swap(true, Ordering::AcqRel) {
            return false;
        }
        error!(error = %err, "filestream: fatal error, stopping uplink");
        true
    }
}
