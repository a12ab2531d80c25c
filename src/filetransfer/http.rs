use super::{FileTransfer, FileTransferError, FileTransferTask};
use reqwest::Client;
use reqwest::header::HeaderName;
use std::time::Duration;
use tracing::debug;

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

/// Plain HTTP backend: PUT to upload, GET to download.
#[derive(Debug, Clone)]
pub struct HttpFileTransfer {
    client: Client,
}

impl HttpFileTransfer {
    pub fn new(timeout: Duration) -> Result<Self, FileTransferError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn check_size(task: &FileTransferTask, actual: u64) -> Result<(), FileTransferError> {
        match task.size {
            Some(expected) if expected != actual => Err(FileTransferError::SizeMismatch {
                path: task.path.clone(),
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

impl FileTransfer for HttpFileTransfer {
    async fn upload(&self, task: &FileTransferTask) -> Result<(), FileTransferError> {
        let data = tokio::fs::read(&task.path)
            .await
            .map_err(|source| FileTransferError::Io {
                path: task.path.clone(),
                source,
            })?;
        Self::check_size(task, data.len() as u64)?;

        let mut request = self.client.put(&task.url);
        if let Some(digest) = &task.digest {
            request = request.header(CONTENT_MD5, digest);
        }
        let response = request.body(data).send().await?;
        if !response.status().is_success() {
            return Err(FileTransferError::Status {
                url: task.url.clone(),
                status: response.status().as_u16(),
            });
        }
        debug!(path = %task.path.display(), "file uploaded");
        Ok(())
    }

    async fn download(&self, task: &FileTransferTask) -> Result<(), FileTransferError> {
        let response = self.client.get(&task.url).send().await?;
        if !response.status().is_success() {
            return Err(FileTransferError::Status {
                url: task.url.clone(),
                status: response.status().as_u16(),
            });
        }
        let data = response.bytes().await?;
        Self::check_size(task, data.len() as u64)?;

        if let Some(parent) = task.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FileTransferError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&task.path, &data)
            .await
            .map_err(|source| FileTransferError::Io {
                path: task.path.clone(),
                source,
            })?;
        debug!(path = %task.path.display(), bytes = data.len(), "file downloaded");
        Ok(())
    }
}
