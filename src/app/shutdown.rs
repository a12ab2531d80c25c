use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels a token on SIGINT or SIGTERM.
#[derive(Debug)]
pub struct SignalHandler {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SignalHandler {
    pub fn install(token: CancellationToken) -> Self {
        let watched = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = watched.cancelled() => {}
                received = wait_for_signal() => {
                    if received {
                        watched.cancel();
                    }
                }
            }
        });
        Self { token, task }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolves when a shutdown signal arrives; `false` if none can be observed.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("Failed to create SIGTERM handler: {}", err);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        true = ctrl_c() => true,
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
            true
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}

async fn ctrl_c() -> bool {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            true
        }
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            false
        }
    }
}
