use super::client::{ApiClient, ApiRequest, ClientError};
use super::stats::UplinkStats;
use crate::filestream::{DeadLatch, FileStreamRequest};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Uplink is dead, request not sent")]
    Dead,
    #[error("Failed to serialize request: {0}")]
    Marshal(#[from] serde_json::Error),
    #[error("Transport failed: {0}")]
    Transport(#[from] ClientError),
    #[error("Server rejected request: HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl SendError {
    pub fn is_dead(&self) -> bool {
        matches!(self, SendError::Dead)
    }
}

/// The stream's single point of network I/O.
pub struct StreamSender<C> {
    client: Arc<C>,
    path: String,
    dead: DeadLatch,
    stats: Arc<UplinkStats>,
}

impl<C: ApiClient> StreamSender<C> {
    pub fn new(client: Arc<C>, path: String, dead: DeadLatch, stats: Arc<UplinkStats>) -> Self {
        Self {
            client,
            path,
            dead,
            stats,
        }
    }

    /// Posts `request` and decodes the response object.
    ///
    /// Refuses to send once the stream is dead. Any transport failure or
    /// non-2xx status is returned as an error; a 2xx whose body is not a
    /// JSON object is logged and yields `Ok(None)`.
    pub async fn send(
        &self,
        request: &FileStreamRequest,
    ) -> Result<Option<Map<String, Value>>, SendError> {
        if self.dead.is_dead() {
            return Err(SendError::Dead);
        }

        let body = serde_json::to_vec(request)?;
        self.stats.record_request(body.len() as u64);
        debug!(
            path = %self.path,
            bytes = body.len(),
            lines = request.line_count(),
            complete = request.complete,
            "filestream: sending request"
        );

        let response = match self
            .client
            .send(ApiRequest::post_json(self.path.clone(), body))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.stats.record_failed_request();
                return Err(err.into());
            }
        };

        if !response.status.is_success() {
            self.stats.record_failed_request();
            let mut body = String::from_utf8_lossy(&response.body).into_owned();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SendError::Status {
                status: response.status.as_u16(),
                body,
            });
        }

        match serde_json::from_slice::<Map<String, Value>>(&response.body) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                warn!(error = %e, "filestream: json decode error");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::ApiResponse;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::StatusCode;

    struct FixedClient {
        status: StatusCode,
        body: &'static str,
        calls: Mutex<Vec<ApiRequest>>,
    }

    impl FixedClient {
        fn new(status: StatusCode, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ApiClient for FixedClient {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
            self.calls.lock().push(request);
            Ok(ApiResponse {
                status: self.status,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    fn sender(client: Arc<FixedClient>, dead: DeadLatch) -> StreamSender<FixedClient> {
        StreamSender::new(client, "files/run/file_stream".to_string(), dead, Arc::new(UplinkStats::new()))
    }

    #[tokio::test]
    async fn test_success_decodes_response_object() {
        let client = FixedClient::new(StatusCode::OK, r#"{"limits":{}}"#);
        let response = sender(client.clone(), DeadLatch::new())
            .send(&FileStreamRequest::default())
            .await
            .unwrap();

        assert!(response.unwrap().contains_key("limits"));
        let calls = client.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "files/run/file_stream");
        assert_eq!(calls[0].method, reqwest::Method::POST);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_an_error() {
        let client = FixedClient::new(StatusCode::OK, "not json");
        let response = sender(client, DeadLatch::new())
            .send(&FileStreamRequest::default())
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let client = FixedClient::new(StatusCode::CONFLICT, "run is finished");
        let err = sender(client, DeadLatch::new())
            .send(&FileStreamRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_dead_stream_never_reaches_transport() {
        let client = FixedClient::new(StatusCode::OK, "{}");
        let dead = DeadLatch::new();
        dead.log_fatal_and_stop_working(&crate::domain::UplinkError::Shutdown("test".into()));

        let err = sender(client.clone(), dead)
            .send(&FileStreamRequest::default())
            .await
            .unwrap_err();

        assert!(err.is_dead());
        assert!(client.calls.lock().is_empty());
    }
}
