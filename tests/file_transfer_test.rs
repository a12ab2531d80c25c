use filestream_uplink::filetransfer::{
    FileTransfer, FileTransferError, FileTransferManager, FileTransferTask, HttpFileTransfer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_bytes, header, method, path},
};

#[tokio::test]
async fn test_upload_puts_file_contents() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/model.bin"))
        .and(body_bytes(b"weights".to_vec()))
        .and(header("content-md5", "abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("model.bin");
    std::fs::write(&file, b"weights").unwrap();

    let transfer = HttpFileTransfer::new(Duration::from_secs(5)).unwrap();
    let task = FileTransferTask::upload(&file, format!("{}/bucket/model.bin", server.uri()))
        .with_digest("abc123")
        .with_size(7);

    transfer.upload(&task).await.unwrap();
}

#[tokio::test]
async fn test_upload_of_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let transfer = HttpFileTransfer::new(Duration::from_secs(5)).unwrap();
    let task = FileTransferTask::upload(dir.path().join("missing"), "http://127.0.0.1:9/x");

    assert!(matches!(
        transfer.upload(&task).await,
        Err(FileTransferError::Io { .. })
    ));
}

#[tokio::test]
async fn test_download_writes_into_new_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/config.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"lr: 0.1\n".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/dir/config.yaml");
    let transfer = HttpFileTransfer::new(Duration::from_secs(5)).unwrap();
    let task = FileTransferTask::download(&target, format!("{}/files/config.yaml", server.uri()))
        .with_size(8);

    transfer.download(&task).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"lr: 0.1\n");
}

#[tokio::test]
async fn test_download_size_mismatch_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"short".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("data.csv");
    let transfer = HttpFileTransfer::new(Duration::from_secs(5)).unwrap();
    let task = FileTransferTask::download(&target, format!("{}/data.csv", server.uri()))
        .with_size(1024);

    match transfer.download(&task).await {
        Err(FileTransferError::SizeMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 1024);
            assert_eq!(actual, 5);
        }
        other => panic!("expected size mismatch, got {other:?}"),
    }
    assert!(!target.exists());
}

#[tokio::test]
async fn test_manager_reports_each_task_once() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/denied"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("artifact.txt");
    std::fs::write(&file, b"content").unwrap();

    let backend = Arc::new(HttpFileTransfer::new(Duration::from_secs(5)).unwrap());
    let mut manager = FileTransferManager::start(backend, 4);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for name in ["ok", "denied"] {
        let done_tx = done_tx.clone();
        let task = FileTransferTask::upload(&file, format!("{}/{name}", server.uri()));
        manager
            .add_task(
                task,
                Box::new(move |task, result| {
                    let _ = done_tx.send((task.url.clone(), result.is_ok()));
                }),
            )
            .await
            .unwrap();
    }
    drop(done_tx);
    manager.close().await;

    let mut outcomes = Vec::new();
    while let Some(outcome) = done_rx.recv().await {
        outcomes.push(outcome);
    }
    assert_eq!(
        outcomes,
        vec![
            (format!("{}/ok", server.uri()), true),
            (format!("{}/denied", server.uri()), false),
        ]
    );

    let task = FileTransferTask::upload(&file, format!("{}/ok", server.uri()));
    assert!(matches!(
        manager.add_task(task, Box::new(|_, _| {})).await,
        Err(FileTransferError::QueueClosed)
    ));
}
