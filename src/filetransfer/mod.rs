//! Artifact file upload/download.
//!
//! The uplink hands out [`FileTransferTask`]s and only learns whether each
//! one succeeded. Retry policy belongs to the backend, not to this module.

mod http;
mod manager;

pub use http::HttpFileTransfer;
pub use manager::{FileTransferManager, TransferCallback};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileTransferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transfer to {url} failed with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("Transfer queue closed")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

/// One file to move between local disk and remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferTask {
    pub kind: TransferKind,
    pub path: PathBuf,
    /// Remote reference, usually a pre-signed URL.
    pub url: String,
    /// Expected digest, passed through to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Expected byte size, checked when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileTransferTask {
    pub fn upload(path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            kind: TransferKind::Upload,
            path: path.into(),
            url: url.into(),
            digest: None,
            size: None,
        }
    }

    pub fn download(path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            kind: TransferKind::Download,
            ..Self::upload(path, url)
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// A storage backend.
pub trait FileTransfer: Send + Sync + 'static {
    fn upload(
        &self,
        task: &FileTransferTask,
    ) -> impl Future<Output = Result<(), FileTransferError>> + Send;

    fn download(
        &self,
        task: &FileTransferTask,
    ) -> impl Future<Output = Result<(), FileTransferError>> + Send;
}
