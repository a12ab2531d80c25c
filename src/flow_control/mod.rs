//! Producer-side backpressure.
//!
//! [`FlowControl`] runs on the producer's own task: forwarding a record is a
//! direct call into a [`RecordSink`], never a queued message. The decision
//! whether to forward or hold is made by the pure [`Gate`] state machine.

mod context;
mod gate;
mod policy;

pub use context::{FlowControlContext, Progress, ProgressSnapshot};
pub use gate::{Effect, FlowInput, Gate, GateState};
pub use policy::FlowControlPolicy;

use crate::domain::Record;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Where the gate delivers its decisions.
pub trait RecordSink: Send + Sync {
    /// Hands one record to the pipeline.
    fn send_record(&self, record: Record) -> impl Future<Output = ()> + Send;

    /// Signals the producer to slow down. Called once per pause episode.
    fn send_pause(&self);
}

/// The gate bound to a sink and to the pipeline's progress counters.
pub struct FlowControl<S> {
    gate: Gate,
    sink: S,
    progress: Arc<Progress>,
}

impl<S: RecordSink> FlowControl<S> {
    pub fn new(sink: S, progress: Arc<Progress>, policy: FlowControlPolicy) -> Self {
        Self {
            gate: Gate::new(policy),
            sink,
            progress,
        }
    }

    /// Offers one record to the gate.
    pub async fn flow(&mut self, record: Record) {
        self.input(FlowInput::Record(record)).await;
    }

    /// Re-evaluates the gate without a record; producers call this while
    /// paused so that progress can resume them.
    pub async fn poll(&mut self) {
        self.input(FlowInput::Tick).await;
    }

    /// Forces everything held to drain and keeps the gate open from now on.
    pub async fn flush(&mut self) {
        self.input(FlowInput::Flush).await;
    }

    async fn input(&mut self, input: FlowInput) {
        let observed = self.progress.snapshot();
        for effect in self.gate.input(input, observed, Instant::now()) {
            match effect {
                Effect::Pause => self.sink.send_pause(),
                Effect::Forward(record) => {
                    self.progress.add_forwarded(record.size_bytes());
                    self.sink.send_record(record).await;
                }
            }
        }
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.state() == GateState::Pausing
    }

    pub fn context(&self) -> FlowControlContext {
        self.gate.context()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<Record>>,
        pauses: AtomicUsize,
    }

    impl RecordSink for CollectingSink {
        async fn send_record(&self, record: Record) {
            self.records.lock().push(record);
        }

        fn send_pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn small_policy(unit: u64) -> FlowControlPolicy {
        FlowControlPolicy {
            high_water_bytes: 2 * unit,
            low_water_bytes: unit,
            stall_timeout: Duration::from_secs(60),
            max_held_records: 100,
        }
    }

    #[tokio::test]
    async fn test_written_progress_resumes_paused_producer() {
        let unit = Record::output("abc").size_bytes();
        let progress = Arc::new(Progress::new());
        let mut flow = FlowControl::new(
            CollectingSink::default(),
            progress.clone(),
            small_policy(unit),
        );

        for _ in 0..4 {
            flow.flow(Record::output("abc")).await;
        }
        assert!(flow.is_paused());
        assert_eq!(flow.sink().records.lock().len(), 2);
        assert_eq!(flow.sink().pauses.load(Ordering::SeqCst), 1);
        assert_eq!(progress.snapshot().forwarded, 2 * unit);

        progress.add_sent(2 * unit);
        progress.add_written(2 * unit);
        flow.poll().await;

        assert!(!flow.is_paused());
        assert_eq!(flow.sink().records.lock().len(), 4);
        assert_eq!(progress.snapshot().forwarded, 4 * unit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_pipeline_recovers_after_timeout() {
        let unit = Record::output("abc").size_bytes();
        let progress = Arc::new(Progress::new());
        let mut flow = FlowControl::new(
            CollectingSink::default(),
            progress.clone(),
            small_policy(unit),
        );

        for _ in 0..3 {
            flow.flow(Record::output("abc")).await;
        }
        assert!(flow.is_paused());

        tokio::time::advance(Duration::from_secs(59)).await;
        flow.poll().await;
        assert!(flow.is_paused());

        tokio::time::advance(Duration::from_secs(2)).await;
        flow.poll().await;
        assert!(!flow.is_paused());
        assert_eq!(flow.into_sink().records.into_inner().len(), 3);
    }
}
