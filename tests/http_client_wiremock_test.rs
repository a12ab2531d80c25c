use filestream_uplink::filestream::{DeadLatch, FileStreamRequest};
use filestream_uplink::reliability::{RetryConfig, RetryStrategy};
use filestream_uplink::sender::{
    ApiClient, ApiRequest, ClientConfig, HttpClient, SendError, StreamSender, UplinkStats,
};
use flate2::read::GzDecoder;
use serde_json::{Value, json};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, header_exists, method, path},
};

const STREAM_PATH: &str = "files/uplink/file_stream";

fn client_config(server: &MockServer, compression: bool) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        enable_compression: compression,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
        },
        ..Default::default()
    }
}

fn request() -> FileStreamRequest {
    FileStreamRequest {
        output: vec!["hello".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{STREAM_PATH}")))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{STREAM_PATH}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exitcode": null })))
        .mount(&server)
        .await;

    let client = HttpClient::new(client_config(&server, false)).unwrap();
    let response = client
        .send(ApiRequest::post_json(STREAM_PATH, b"{}".to_vec()))
        .await
        .unwrap();

    assert!(response.status.is_success());
    let stats = client.connection_stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let client = HttpClient::new(client_config(&server, false)).unwrap();
    let response = client
        .send(ApiRequest::post_json(STREAM_PATH, b"{}".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 400);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HttpClient::new(client_config(&server, false)).unwrap();
    let response = client
        .send(ApiRequest::post_json(STREAM_PATH, b"{}".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_compressed_body_carries_gzip_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("content-encoding", "gzip"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = HttpClient::new(client_config(&server, true)).unwrap();
    let payload = serde_json::to_vec(&request()).unwrap();
    let response = client
        .send(ApiRequest::post_json(STREAM_PATH, payload))
        .await
        .unwrap();
    assert!(response.status.is_success());

    let received = server.received_requests().await.unwrap();
    let mut decoded = String::new();
    GzDecoder::new(received[0].body.as_slice())
        .read_to_string(&mut decoded)
        .unwrap();
    let body: Value = serde_json::from_str(&decoded).unwrap();
    assert_eq!(body["output"], json!(["hello"]));
}

#[tokio::test]
async fn test_stream_sender_decodes_response_object() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{STREAM_PATH}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "limits": { "rate": 5 } })))
        .mount(&server)
        .await;

    let client = Arc::new(HttpClient::new(client_config(&server, false)).unwrap());
    let stats = Arc::new(UplinkStats::new());
    let sender = StreamSender::new(client, STREAM_PATH.to_string(), DeadLatch::new(), stats.clone());

    let response = sender.send(&request()).await.unwrap().unwrap();
    assert_eq!(response["limits"]["rate"], json!(5));
    assert_eq!(stats.snapshot().requests_attempted, 1);
}

#[tokio::test]
async fn test_stream_sender_reports_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("run is finished"))
        .mount(&server)
        .await;

    let client = Arc::new(HttpClient::new(client_config(&server, false)).unwrap());
    let stats = Arc::new(UplinkStats::new());
    let sender = StreamSender::new(client, STREAM_PATH.to_string(), DeadLatch::new(), stats.clone());

    match sender.send(&request()).await {
        Err(SendError::Status { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "run is finished");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(stats.snapshot().failed_requests, 1);
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let mut config = ClientConfig {
        base_url: "http://127.0.0.1:9/".to_string(),
        connection_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    config.retry.max_attempts = 1;

    let client = HttpClient::new(config).unwrap();
    let result = client
        .send(ApiRequest::post_json(STREAM_PATH, b"{}".to_vec()))
        .await;
    assert!(result.is_err());
}
