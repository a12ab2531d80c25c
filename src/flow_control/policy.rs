use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Thresholds driving the gate's pause/resume decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlPolicy {
    /// Backlog at which the gate starts pausing the producer.
    pub high_water_bytes: u64,
    /// Backlog below which a paused gate resumes forwarding.
    pub low_water_bytes: u64,
    /// Pause time without written progress before the gate resumes anyway.
    #[serde(with = "crate::app::config::serde_helpers")]
    pub stall_timeout: Duration,
    /// Upper bound on records held while pausing.
    pub max_held_records: usize,
}

impl Default for FlowControlPolicy {
    fn default() -> Self {
        Self {
            high_water_bytes: 4 * MIB,
            low_water_bytes: MIB,
            stall_timeout: Duration::from_secs(60),
            max_held_records: 10_000,
        }
    }
}
