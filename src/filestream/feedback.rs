use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Consumer of decoded server responses.
///
/// The transmit stage never waits on a handler's decision; this is a
/// one-way spur for reacting to server-driven hints.
pub trait FeedbackHandler: Send + Sync + 'static {
    fn handle(&mut self, response: Map<String, Value>);
}

/// Logs and discards every response.
#[derive(Debug, Default)]
pub struct DrainFeedback {
    seen: u64,
}

impl FeedbackHandler for DrainFeedback {
    fn handle(&mut self, response: Map<String, Value>) {
        self.seen += 1;
        debug!(responses = self.seen, keys = response.len(), "filestream: server response");
    }
}

pub async fn process_feedback(
    mut responses: mpsc::Receiver<Map<String, Value>>,
    mut handler: Box<dyn FeedbackHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            response = responses.recv() => match response {
                Some(response) => handler.handle(response),
                None => break,
            },
        }
    }
    responses.close();
    while responses.try_recv().is_ok() {}
}
