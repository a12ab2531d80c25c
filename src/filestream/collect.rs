use super::request::{BufferMutation, RequestBuffer, TransmitBatch};
use crate::domain::OffsetMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Accumulates mutations and releases snapshots no faster than
/// `transmit_rate_limit`.
#[derive(Debug, Clone)]
pub struct CollectLoop {
    pub transmit_rate_limit: Duration,
    pub max_request_lines: usize,
}

impl CollectLoop {
    /// Runs until the mutation queue closes and everything pending was
    /// released, or until cancelled.
    ///
    /// Closing `batches` on return is what tells the transmit stage to stop.
    pub async fn run(
        self,
        mut mutations: mpsc::Receiver<BufferMutation>,
        batches: mpsc::Sender<TransmitBatch>,
        initial_offsets: OffsetMap,
        cancel: CancellationToken,
    ) {
        let mut buffer = RequestBuffer::new(initial_offsets, self.max_request_lines);
        // The first snapshot may go out immediately.
        let mut next_release = Instant::now();
        let mut release_ready = false;
        let mut input_open = true;

        loop {
            if !input_open && !buffer.has_changes() {
                break;
            }
            let waiting = buffer.has_changes() && !release_ready;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("filestream: collect loop cancelled");
                    break;
                }
                permit = batches.reserve(), if release_ready => {
                    let Ok(permit) = permit else {
                        debug!("filestream: transmit stage gone, collect loop exiting");
                        break;
                    };
                    if let Some(batch) = buffer.take_snapshot() {
                        permit.send(batch);
                    }
                    release_ready = false;
                    next_release = Instant::now() + self.transmit_rate_limit;
                }
                _ = sleep_until(next_release), if waiting => {
                    release_ready = true;
                }
                mutation = mutations.recv(), if input_open => match mutation {
                    Some(mutation) => buffer.apply(mutation),
                    None => input_open = false,
                },
            }
        }

        if buffer.duplicates() > 0 {
            debug!(duplicates = buffer.duplicates(), "filestream: dropped accounted rows");
        }
        mutations.close();
        while mutations.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> BufferMutation {
        BufferMutation::AppendOutput {
            line: format!("line {n}"),
            offset: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_are_coalesced_by_rate_limit() {
        let (mutation_tx, mutation_rx) = mpsc::channel(1024);
        let (batch_tx, mut batch_rx) = mpsc::channel(1);
        let collect = CollectLoop {
            transmit_rate_limit: Duration::from_secs(1),
            max_request_lines: 10_000,
        };
        let handle = tokio::spawn(collect.run(
            mutation_rx,
            batch_tx,
            OffsetMap::new(),
            CancellationToken::new(),
        ));

        for n in 0..100 {
            mutation_tx.send(line(n)).await.unwrap();
        }
        drop(mutation_tx);

        let mut lines = Vec::new();
        let mut batches = 0;
        while let Some(batch) = batch_rx.recv().await {
            batches += 1;
            lines.extend(batch.request.output);
        }
        handle.await.unwrap();

        assert!(batches <= 2, "expected coalescing, got {batches} batches");
        assert_eq!(lines, (0..100).map(|n| format!("line {n}")).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_without_flushing() {
        let (mutation_tx, mutation_rx) = mpsc::channel(16);
        let (batch_tx, mut batch_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let collect = CollectLoop {
            transmit_rate_limit: Duration::from_secs(3600),
            max_request_lines: 10,
        };
        let handle = tokio::spawn(collect.run(mutation_rx, batch_tx, OffsetMap::new(), cancel.clone()));

        mutation_tx.send(line(0)).await.unwrap();
        // First window opens immediately.
        let first = batch_rx.recv().await.unwrap();
        assert_eq!(first.request.output.len(), 1);

        mutation_tx.send(line(1)).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        assert!(batch_rx.recv().await.is_none());
        assert!(mutation_tx.send(line(2)).await.is_err());
    }
}
