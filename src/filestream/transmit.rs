use super::dead::DeadLatch;
use super::request::{FileStreamRequest, TransmitBatch};
use crate::domain::{OffsetMap, UplinkError};
use crate::flow_control::Progress;
use crate::sender::{ApiClient, StreamSender, UplinkStats};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Turns snapshots into requests and keeps the connection alive with
/// heartbeats while idle.
pub struct TransmitLoop<C> {
    pub heartbeat_interval: Duration,
    pub sender: StreamSender<C>,
    pub dead: DeadLatch,
    pub progress: Arc<Progress>,
    pub stats: Arc<UplinkStats>,
    pub acknowledged: watch::Sender<OffsetMap>,
}

impl<C: ApiClient> TransmitLoop<C> {
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<TransmitBatch>,
        feedback: mpsc::Sender<Map<String, Value>>,
        cancel: CancellationToken,
    ) {
        let mut last_transmit = Instant::now();

        loop {
            let heartbeat_at = last_transmit + self.heartbeat_interval;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("filestream: transmit loop cancelled");
                    break;
                }
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        if self.transmit(batch, &feedback, &cancel).await {
                            last_transmit = Instant::now();
                        }
                    }
                    None => break,
                },
                _ = sleep_until(heartbeat_at) => {
                    if !self.dead.is_dead() {
                        self.stats.record_heartbeat();
                        self.send(&FileStreamRequest::default(), &feedback, &cancel).await;
                    }
                    last_transmit = Instant::now();
                }
            }
        }

        batches.close();
        while batches.try_recv().is_ok() {}
    }

    /// Returns whether a request went out for `batch`.
    async fn transmit(
        &self,
        batch: TransmitBatch,
        feedback: &mpsc::Sender<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> bool {
        self.progress.add_sent(batch.bytes);

        if batch.request.is_empty() {
            // Nothing for the server; the bytes are written as far as the
            // backlog is concerned.
            self.progress.add_written(batch.bytes);
            self.acknowledge(&batch.end_offsets);
            return false;
        }

        if self.send(&batch.request, feedback, cancel).await {
            self.progress.add_written(batch.bytes);
            self.acknowledge(&batch.end_offsets);
        }
        true
    }

    /// Sends one request; a failure kills the stream. Cancellation abandons
    /// the request in flight.
    async fn send(
        &self,
        request: &FileStreamRequest,
        feedback: &mpsc::Sender<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> bool {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("filestream: request abandoned on cancel");
                return false;
            }
            result = self.sender.send(request) => result,
        };
        match result {
            Ok(response) => {
                if let Some(response) = response
                    && feedback.send(response).await.is_err()
                {
                    debug!("filestream: feedback stage gone, dropping response");
                }
                true
            }
            Err(err) => {
                if !err.is_dead() {
                    self.dead
                        .log_fatal_and_stop_working(&UplinkError::Transmission(err));
                }
                false
            }
        }
    }

    fn acknowledge(&self, offsets: &OffsetMap) {
        self.acknowledged
            .send_modify(|acknowledged| acknowledged.merge(offsets));
    }
}
