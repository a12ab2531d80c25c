use filestream_uplink::app::{App, Config};
use filestream_uplink::domain::Substream;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn mock_collector() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files/uplink/file_stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    server
}

fn test_config(server: &MockServer) -> Config {
    let mut config = Config {
        endpoint: server.uri(),
        transmit_interval_ms: 10,
        disable_compression: true,
        disable_monitor: true,
        shutdown_timeout_secs: 10,
        ..Config::default()
    };
    config.post_process().unwrap();
    config.validate().unwrap();
    config
}

async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_run_streams_stdin_records_and_completes() {
    let server = mock_collector().await;
    let config = Config {
        exit_code: 3,
        ..test_config(&server)
    };

    let input = concat!(
        r#"{"type":"history","row":{"_step":0,"loss":1.5}}"#,
        "\n",
        "\n",
        r#"{"type":"output","line":"epoch 1"}"#,
        "\n",
        "this is not json\n",
        r#"{"type":"history","row":{"_step":1,"loss":0.9}}"#,
        "\n",
        r#"{"type":"summary","values":{"best_loss":0.9}}"#,
        "\n",
    );

    let app = App::from_config(config).unwrap();
    let summary = app.run(input.as_bytes()).await.unwrap();

    assert!(!summary.dead);
    assert!(!summary.interrupted);
    assert_eq!(summary.records_read, 4);
    assert_eq!(summary.invalid_lines, 1);
    assert_eq!(summary.acknowledged.get(&Substream::History), 2);
    assert_eq!(summary.acknowledged.get(&Substream::Output), 1);
    assert_eq!(summary.acknowledged.get(&Substream::Summary), 1);

    let bodies = received_bodies(&server).await;
    let last = bodies.last().unwrap();
    assert_eq!(last["complete"], json!(true));
    assert_eq!(last["exitcode"], json!(3));

    let history: Vec<Value> = bodies
        .iter()
        .filter_map(|body| body.get("history").and_then(Value::as_array))
        .flatten()
        .map(|line| serde_json::from_str(line.as_str().unwrap()).unwrap())
        .collect();
    assert_eq!(
        history,
        vec![json!({"_step": 0, "loss": 1.5}), json!({"_step": 1, "loss": 0.9})]
    );
}

#[tokio::test]
async fn test_resume_offsets_skip_rows_already_written() {
    let server = mock_collector().await;
    let dir = tempfile::tempdir().unwrap();
    let offsets = dir.path().join("offsets.json");
    std::fs::write(&offsets, r#"{"history": 1}"#).unwrap();

    let config = Config {
        resume_offsets: Some(offsets),
        ..test_config(&server)
    };
    let input = concat!(
        r#"{"type":"history","row":{"_step":0},"offset":0}"#,
        "\n",
        r#"{"type":"history","row":{"_step":1},"offset":1}"#,
        "\n",
    );

    let summary = App::from_config(config)
        .unwrap()
        .run(input.as_bytes())
        .await
        .unwrap();
    assert_eq!(summary.acknowledged.get(&Substream::History), 2);

    let bodies = received_bodies(&server).await;
    let first = bodies.iter().find(|body| body.get("history").is_some()).unwrap();
    assert_eq!(first["history"], json!([r#"{"_step":1}"#]));
    assert_eq!(first["offsets"]["history"], json!(1));
}

#[tokio::test]
async fn test_shutdown_token_interrupts_open_input() {
    let server = mock_collector().await;
    let app = App::from_config(test_config(&server)).unwrap();
    let shutdown = app.shutdown_token();

    // An input that never reaches EOF.
    let (_writer, reader) = tokio::io::duplex(64);
    let run = tokio::spawn(app.run(tokio::io::BufReader::new(reader)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.records_read, 0);

    let bodies = received_bodies(&server).await;
    assert_eq!(bodies.last().unwrap()["complete"], json!(true));
}

#[tokio::test]
async fn test_missing_resume_file_fails_run() {
    let server = mock_collector().await;
    let config = Config {
        resume_offsets: Some("/nonexistent/offsets.json".into()),
        ..test_config(&server)
    };

    let result = App::from_config(config).unwrap().run(&b""[..]).await;
    assert!(result.is_err());
}
