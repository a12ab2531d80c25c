//! The streaming uplink pipeline.
//!
//! ```text
//! Update queue -> ingestion -> mutation queue -> collect -> snapshot queue
//!     -> transmit -> HTTP -> feedback queue -> feedback
//! ```
//!
//! Every stage runs on its own task and owns the sending half of its output
//! queue, so closing the update queue shuts the pipeline down front to back.
//! [`FileStream::finish`] and [`FileStream::stop`] are the single join point.

mod collect;
mod dead;
mod feedback;
mod request;
mod transmit;
mod update;
pub mod updates;

pub use collect::CollectLoop;
pub use dead::DeadLatch;
pub use feedback::{DrainFeedback, FeedbackHandler};
pub use request::{BufferMutation, FileChunk, FileStreamRequest, RequestBuffer, TransmitBatch};
pub use transmit::TransmitLoop;
pub use update::{Printer, Update, UpdateContext, UpdateError};

use crate::domain::{OffsetMap, Record, UplinkError};
use crate::flow_control::{Progress, RecordSink};
use crate::sender::{ApiClient, StreamSender, UplinkStats, UplinkStatsSnapshot};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-session pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStreamSettings {
    /// Path of the stream endpoint, relative to the client's base URL.
    pub path: String,
    /// Longest silence before an empty request is sent.
    #[serde(with = "crate::app::config::serde_helpers")]
    pub heartbeat_interval: Duration,
    /// Minimum time between two released snapshots.
    #[serde(with = "crate::app::config::serde_helpers")]
    pub transmit_interval: Duration,
    /// Capacity of each queue between stages.
    pub queue_capacity: usize,
    /// Upper bound on lines per substream in one request.
    pub max_request_lines: usize,
}

impl Default for FileStreamSettings {
    fn default() -> Self {
        Self {
            path: "files/uplink/file_stream".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            transmit_interval: Duration::from_secs(15),
            queue_capacity: 1024,
            max_request_lines: 10_000,
        }
    }
}

/// Cheap handle for pushing updates into a running stream.
///
/// Also the sink the flow-control gate forwards into. Every handle must be
/// dropped before [`FileStream::finish`] can complete.
#[derive(Clone)]
pub struct UpdateSender {
    updates: mpsc::Sender<Box<dyn Update>>,
    dead: DeadLatch,
    stats: Arc<UplinkStats>,
}

impl UpdateSender {
    /// Queues `update`. After the stream died or stopped this is a no-op.
    pub async fn send(&self, update: Box<dyn Update>) {
        if self.updates.send(update).await.is_err() {
            debug!("filestream: stream closed, dropping update");
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead.is_dead()
    }
}

impl RecordSink for UpdateSender {
    async fn send_record(&self, record: Record) {
        self.send(updates::from_record(record)).await;
    }

    fn send_pause(&self) {
        self.stats.record_pause();
        info!("filestream: asking producer to pause");
    }
}

struct Running {
    updates: Option<mpsc::Sender<Box<dyn Update>>>,
    workers: Vec<JoinHandle<()>>,
}

impl Running {
    /// Waits for every worker; a worker is only removed once it finished, so
    /// an interrupted join can be resumed.
    async fn join(&mut self) {
        while let Some(worker) = self.workers.first_mut() {
            let result = worker.await;
            self.workers.remove(0);
            if let Err(e) = result {
                warn!(error = %e, "filestream: worker supervisor failed");
            }
        }
    }
}

/// Spawns one pipeline stage. A stage that panics kills the stream, so the
/// failure is reported once and the remaining stages stop sending.
fn spawn_worker<F>(worker: &'static str, dead: DeadLatch, stage: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stage = tokio::spawn(stage);
    tokio::spawn(async move {
        if let Err(e) = stage.await {
            dead.log_fatal_and_stop_working(&UplinkError::WorkerFailed {
                worker,
                reason: e.to_string(),
            });
        }
    })
}

/// One uplink session.
pub struct FileStream<C> {
    settings: FileStreamSettings,
    client: Arc<C>,
    dead: DeadLatch,
    progress: Arc<Progress>,
    stats: Arc<UplinkStats>,
    printer: Printer,
    cancel: CancellationToken,
    acknowledged: watch::Receiver<OffsetMap>,
    acknowledged_tx: Option<watch::Sender<OffsetMap>>,
    feedback: Option<Box<dyn FeedbackHandler>>,
    running: Option<Running>,
}

impl<C: ApiClient> FileStream<C> {
    pub fn new(settings: FileStreamSettings, client: Arc<C>) -> Self {
        let (acknowledged_tx, acknowledged) = watch::channel(OffsetMap::new());
        Self {
            settings,
            client,
            dead: DeadLatch::new(),
            progress: Arc::new(Progress::new()),
            stats: Arc::new(UplinkStats::new()),
            printer: Printer::new(),
            cancel: CancellationToken::new(),
            acknowledged,
            acknowledged_tx: Some(acknowledged_tx),
            feedback: Some(Box::new(DrainFeedback::default())),
            running: None,
        }
    }

    /// Replaces the default response handler. Must be called before `start`.
    pub fn with_feedback(mut self, handler: Box<dyn FeedbackHandler>) -> Self {
        self.feedback = Some(handler);
        self
    }

    /// Spawns the pipeline workers.
    ///
    /// `initial_offsets` are the positions a previous session already had
    /// written; nothing below them is sent again.
    pub fn start(&mut self, initial_offsets: OffsetMap) -> Result<(), UplinkError> {
        let (Some(acknowledged_tx), Some(feedback_handler)) =
            (self.acknowledged_tx.take(), self.feedback.take())
        else {
            return Err(UplinkError::AlreadyStarted);
        };
        acknowledged_tx.send_replace(initial_offsets.clone());

        let capacity = self.settings.queue_capacity.max(1);
        let (update_tx, update_rx) = mpsc::channel(capacity);
        let (mutation_tx, mutation_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (feedback_tx, feedback_rx) = mpsc::channel(capacity);

        let ingest = process_updates(
            update_rx,
            mutation_tx,
            Ingestion {
                settings: self.settings.clone(),
                initial_offsets: initial_offsets.clone(),
                printer: self.printer.clone(),
                dead: self.dead.clone(),
                stats: self.stats.clone(),
            },
            self.cancel.clone(),
        );
        let collect = CollectLoop {
            transmit_rate_limit: self.settings.transmit_interval,
            max_request_lines: self.settings.max_request_lines,
        }
        .run(mutation_rx, batch_tx, initial_offsets, self.cancel.clone());
        let transmit = TransmitLoop {
            heartbeat_interval: self.settings.heartbeat_interval,
            sender: StreamSender::new(
                self.client.clone(),
                self.settings.path.clone(),
                self.dead.clone(),
                self.stats.clone(),
            ),
            dead: self.dead.clone(),
            progress: self.progress.clone(),
            stats: self.stats.clone(),
            acknowledged: acknowledged_tx,
        }
        .run(batch_rx, feedback_tx, self.cancel.clone());
        let feedback = feedback::process_feedback(feedback_rx, feedback_handler, self.cancel.clone());

        self.running = Some(Running {
            updates: Some(update_tx),
            workers: vec![
                spawn_worker("ingest", self.dead.clone(), ingest),
                spawn_worker("collect", self.dead.clone(), collect),
                spawn_worker("transmit", self.dead.clone(), transmit),
                spawn_worker("feedback", self.dead.clone(), feedback),
            ],
        });
        info!(path = %self.settings.path, "filestream: started");
        Ok(())
    }

    /// A handle for producers; `None` before `start` or after shutdown.
    pub fn sender(&self) -> Option<UpdateSender> {
        let updates = self.running.as_ref()?.updates.clone()?;
        Some(UpdateSender {
            updates,
            dead: self.dead.clone(),
            stats: self.stats.clone(),
        })
    }

    pub async fn stream_update(&self, update: Box<dyn Update>) {
        match self.running.as_ref().and_then(|running| running.updates.as_ref()) {
            Some(updates) => {
                if updates.send(update).await.is_err() {
                    debug!("filestream: stream closed, dropping update");
                }
            }
            None => warn!("filestream: update submitted to a stream that is not running"),
        }
    }

    pub async fn stream_record(&self, record: Record) {
        self.stream_update(updates::from_record(record)).await;
    }

    /// Marks the run complete with `exit_code`, then drains and joins.
    pub async fn finish_with_exit(&mut self, exit_code: i32) {
        self.stream_update(Box::new(updates::ExitUpdate::new(exit_code)))
            .await;
        self.finish().await;
    }

    /// Closes the update queue and waits until everything queued was sent.
    ///
    /// Safe to abandon (e.g. under a timeout) and follow with [`stop`](Self::stop).
    pub async fn finish(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        running.updates = None;
        running.join().await;
        self.running = None;
        let acknowledged = self.acknowledged_offsets();
        info!(dead = self.dead.is_dead(), ?acknowledged, "filestream: finished");
    }

    /// Cancels every worker and waits for them to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(mut running) = self.running.take() {
            running.updates = None;
            running.join().await;
        }
        info!("filestream: stopped");
    }

    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_dead(&self) -> bool {
        self.dead.is_dead()
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub fn stats(&self) -> UplinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    pub fn settings(&self) -> &FileStreamSettings {
        &self.settings
    }

    /// Per-substream positions the server has acknowledged writing.
    pub fn acknowledged_offsets(&self) -> OffsetMap {
        self.acknowledged.borrow().clone()
    }

}

struct Ingestion {
    settings: FileStreamSettings,
    initial_offsets: OffsetMap,
    printer: Printer,
    dead: DeadLatch,
    stats: Arc<UplinkStats>,
}

/// Applies updates in arrival order and forwards their mutations.
///
/// A failing update kills the stream; afterwards input is still drained so
/// producers never block on a full queue.
async fn process_updates(
    mut updates: mpsc::Receiver<Box<dyn Update>>,
    mutations: mpsc::Sender<BufferMutation>,
    ingestion: Ingestion,
    cancel: CancellationToken,
) {
    debug!("filestream: open");
    let mut pending = Vec::new();

    loop {
        let update = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            update = updates.recv() => update,
        };
        let Some(update) = update else {
            break;
        };

        if ingestion.dead.is_dead() {
            ingestion.stats.record_update_discarded();
            continue;
        }

        let weight = update.weight();
        let result = {
            let mut ctx = UpdateContext::new(
                &mut pending,
                &ingestion.settings,
                &ingestion.initial_offsets,
                &ingestion.printer,
            );
            update.apply(&mut ctx)
        };

        match result {
            Ok(()) => {
                ingestion.stats.record_update_applied();
                pending.push(BufferMutation::Account { bytes: weight });
                for mutation in pending.drain(..) {
                    if mutations.send(mutation).await.is_err() {
                        debug!("filestream: collect stage gone");
                    }
                }
            }
            Err(err) => {
                pending.clear();
                ingestion.printer.write(format!("Uplink stopped: {err}"));
                ingestion
                    .dead
                    .log_fatal_and_stop_working(&UplinkError::Update(err));
            }
        }
    }

    updates.close();
    while updates.try_recv().is_ok() {
        ingestion.stats.record_update_discarded();
    }
    debug!("filestream: closed");
}
