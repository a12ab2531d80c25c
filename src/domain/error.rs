use thiserror::Error;

/// Top-level error type for the uplink.
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Update error: {0}")]
    Update(#[from] crate::filestream::UpdateError),

    #[error("Transmission error: {0}")]
    Transmission(#[from] crate::sender::SendError),

    #[error("Client error: {0}")]
    Client(#[from] crate::sender::ClientError),

    #[error("File transfer error: {0}")]
    FileTransfer(#[from] crate::filetransfer::FileTransferError),

    #[error("Pipeline worker '{worker}' failed: {reason}")]
    WorkerFailed { worker: &'static str, reason: String },

    #[error("Stream already started")]
    AlreadyStarted,

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
