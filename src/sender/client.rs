use crate::reliability::{RetryConfig, RetryPolicy};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderName};
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request timeout after {attempts} attempt(s)")]
    RequestTimeout { attempts: u32 },
    #[error("Network error after {attempts} attempt(s): {source}")]
    NetworkError {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub timeout: Duration,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub connection_timeout: Duration,
    pub max_connections: usize,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            timeout: Duration::from_secs(180),
            connection_timeout: Duration::from_secs(10),
            max_connections: 20,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("filestream-uplink/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: true,
            retry: RetryConfig::default(),
        }
    }
}

/// One request to the collector API, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn post_json(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Transport beneath the stream's send path.
///
/// Implementations retry transient failures themselves; whatever they return
/// is final for the caller.
pub trait ApiClient: Send + Sync + 'static {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, ClientError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// reqwest-backed [`ApiClient`] with gzip bodies and retry on transient
/// failures.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    base_url: Url,
    retry: RetryPolicy,
    stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut base_url: Url = config.base_url.parse().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;
        // Url::join drops the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            base_url,
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        ConnectionStats {
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            average_response_time: if total_requests > 0 {
                Duration::from_millis(total_response_time / total_requests)
            } else {
                Duration::ZERO
            },
        }
    }

    fn compress(body: &[u8]) -> Result<Bytes, ClientError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
        encoder.write_all(body)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    async fn backoff(&self, attempts: u32) {
        self.stats.record_retry();
        let delay = self.retry.calculate_delay(attempts.saturating_sub(1));
        tokio::time::sleep(delay).await;
    }
}

impl ApiClient for HttpClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.base_url.join(&request.path).map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid request path '{}': {}", request.path, e))
        })?;
        let compressed = self.config.enable_compression && !request.body.is_empty();
        let body = if compressed {
            Self::compress(&request.body)?
        } else {
            request.body.clone()
        };
        let request_id = Uuid::new_v4().to_string();

        let mut attempts = 0;
        loop {
            attempts += 1;
            let started = Instant::now();

            let mut builder = self
                .client
                .request(request.method.clone(), url.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(REQUEST_ID, &request_id)
                .body(body.clone());
            if compressed {
                builder = builder.header(CONTENT_ENCODING, "gzip");
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if self.retry.should_retry_status(status) && !self.retry.is_exhausted(attempts) {
                        self.stats.record_request(false, started.elapsed());
                        warn!(%url, %status, attempts, "transient HTTP status, retrying");
                        self.backoff(attempts).await;
                        continue;
                    }
                    let body = response
                        .bytes()
                        .await
                        .map_err(|source| ClientError::NetworkError { attempts, source })?;
                    self.stats
                        .record_request(status.is_success(), started.elapsed());
                    debug!(%url, %status, attempts, bytes = body.len(), "request completed");
                    return Ok(ApiResponse { status, body });
                }
                Err(error) => {
                    self.stats.record_request(false, started.elapsed());
                    if self.retry.should_retry_error(&error) && !self.retry.is_exhausted(attempts) {
                        warn!(%url, error = %error, attempts, "transport error, retrying");
                        self.backoff(attempts).await;
                        continue;
                    }
                    return Err(if error.is_timeout() {
                        ClientError::RequestTimeout { attempts }
                    } else {
                        ClientError::NetworkError {
                            attempts,
                            source: error,
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpClient::new(config),
            Err(ClientError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let client = HttpClient::new(ClientConfig {
            base_url: "http://collector.local/api".to_string(),
            ..Default::default()
        })
        .unwrap();

        let joined = client.base_url().join("files/run/file_stream").unwrap();
        assert_eq!(joined.as_str(), "http://collector.local/api/files/run/file_stream");
    }

    #[test]
    fn test_compress_round_trips() {
        let compressed = HttpClient::compress(br#"{"history":["a"]}"#).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, r#"{"history":["a"]}"#);
    }
}
