use super::{FileTransfer, FileTransferError, FileTransferTask, TransferKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Called once per task with its outcome.
pub type TransferCallback = Box<dyn FnOnce(&FileTransferTask, Result<(), FileTransferError>) + Send>;

/// Runs transfer tasks from a bounded queue, one at a time.
pub struct FileTransferManager {
    tasks: Option<mpsc::Sender<(FileTransferTask, TransferCallback)>>,
    worker: Option<JoinHandle<()>>,
}

impl FileTransferManager {
    pub fn start<T: FileTransfer>(backend: Arc<T>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tasks: Some(tx),
            worker: Some(tokio::spawn(run(backend, rx))),
        }
    }

    /// Queues `task`; waits for room when the queue is full.
    pub async fn add_task(
        &self,
        task: FileTransferTask,
        on_complete: TransferCallback,
    ) -> Result<(), FileTransferError> {
        let tasks = self.tasks.as_ref().ok_or(FileTransferError::QueueClosed)?;
        tasks
            .send((task, on_complete))
            .await
            .map_err(|_| FileTransferError::QueueClosed)
    }

    /// Stops accepting tasks and waits for the queued ones to finish.
    pub async fn close(&mut self) {
        self.tasks.take();
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            warn!(error = %e, "file transfer worker panicked");
        }
    }
}

async fn run<T: FileTransfer>(
    backend: Arc<T>,
    mut tasks: mpsc::Receiver<(FileTransferTask, TransferCallback)>,
) {
    while let Some((task, on_complete)) = tasks.recv().await {
        let result = match task.kind {
            TransferKind::Upload => backend.upload(&task).await,
            TransferKind::Download => backend.download(&task).await,
        };
        match &result {
            Ok(()) => debug!(kind = ?task.kind, path = %task.path.display(), "transfer complete"),
            Err(e) => warn!(kind = ?task.kind, path = %task.path.display(), error = %e, "transfer failed"),
        }
        on_complete(&task, result);
    }
}
