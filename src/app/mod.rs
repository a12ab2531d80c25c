pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};
pub use shutdown::SignalHandler;

use crate::domain::{OffsetMap, Record};
use crate::filestream::FileStream;
use crate::flow_control::FlowControl;
use crate::monitor::SystemMonitor;
use crate::sender::{ApiClient, HttpClient, UplinkStatsSnapshot};
use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often a paused producer re-checks the gate.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MONITOR_QUEUE_CAPACITY: usize = 64;

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub acknowledged: OffsetMap,
    pub dead: bool,
    pub interrupted: bool,
    pub records_read: u64,
    pub invalid_lines: u64,
    pub stats: UplinkStatsSnapshot,
}

/// Streams NDJSON records from one input through the uplink.
pub struct App<C> {
    config: Config,
    client: Arc<C>,
    shutdown: CancellationToken,
}

impl App<HttpClient> {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let client = HttpClient::new(config.client.clone()).context("building HTTP client")?;
        Ok(Self::with_client(config, Arc::new(client)))
    }
}

impl<C: ApiClient> App<C> {
    pub fn with_client(config: Config, client: Arc<C>) -> Self {
        Self {
            config,
            client,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token ends input reading and starts a graceful finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run<R>(self, input: R) -> anyhow::Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let Self {
            config,
            client,
            shutdown,
        } = self;

        let initial_offsets = match &config.resume_offsets {
            Some(path) => load_offsets(path).await?,
            None => OffsetMap::new(),
        };

        let mut stream = FileStream::new(config.filestream.clone(), client);
        stream.start(initial_offsets)?;
        let sender = stream
            .sender()
            .context("stream started without an update queue")?;
        let mut gate = FlowControl::new(sender, stream.progress(), config.flow_control.clone());

        let (monitor_tx, mut monitor_rx) = mpsc::channel::<Record>(MONITOR_QUEUE_CAPACITY);
        let mut monitor = SystemMonitor::with_default_assets(config.monitor.clone(), monitor_tx);
        monitor.start();

        let mut lines = input.lines();
        let mut poll = tokio::time::interval(PAUSE_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut records_read = 0u64;
        let mut invalid_lines = 0u64;
        let mut interrupted = false;

        loop {
            let paused = gate.is_paused();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    interrupted = true;
                    break;
                }
                Some(record) = monitor_rx.recv() => gate.flow(record).await,
                _ = poll.tick(), if paused => gate.poll().await,
                line = lines.next_line(), if !paused => match line {
                    Ok(Some(line)) => match parse_line(&line) {
                        Some(Ok(record)) => {
                            records_read += 1;
                            gate.flow(record).await;
                        }
                        Some(Err(e)) => {
                            invalid_lines += 1;
                            warn!(error = %e, "skipping malformed input line");
                        }
                        None => {}
                    },
                    Ok(None) => {
                        info!(records_read, "input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read input");
                        break;
                    }
                },
            }
        }

        monitor.stop().await;
        drop(monitor);
        while let Ok(record) = monitor_rx.try_recv() {
            gate.flow(record).await;
        }
        gate.flush().await;
        drop(gate);

        match tokio::time::timeout(
            config.shutdown_timeout,
            stream.finish_with_exit(config.exit_code),
        )
        .await
        {
            Ok(()) => {}
            Err(_) => {
                warn!(
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "shutdown timeout exceeded, cancelling uplink"
                );
                stream.stop().await;
            }
        }

        Ok(RunSummary {
            acknowledged: stream.acknowledged_offsets(),
            dead: stream.is_dead(),
            interrupted,
            records_read,
            invalid_lines,
            stats: stream.stats(),
        })
    }
}

/// `None` for blank lines.
fn parse_line(line: &str) -> Option<Result<Record, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(serde_json::from_str(line))
    }
}

async fn load_offsets(path: &Path) -> anyhow::Result<OffsetMap> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading resume offsets from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("parsing resume offsets in {}", path.display()))
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args_os())?;

    if let Err(e) = setup_logging(config.log_level, config.log_format) {
        eprintln!("Warning: {e}");
    }
    info!(
        endpoint = %config.endpoint,
        path = %config.stream_path,
        "Starting filestream-uplink v{}",
        get_version()
    );

    let app = App::from_config(config)?;
    let _signals = SignalHandler::install(app.shutdown_token());
    let summary = app.run(BufReader::new(tokio::io::stdin())).await?;

    if summary.dead {
        warn!("uplink died; acknowledged offsets may lag the input");
    }
    info!(
        records = summary.records_read,
        invalid = summary.invalid_lines,
        requests = summary.stats.requests_attempted,
        "filestream-uplink finished"
    );
    println!("{}", serde_json::to_string(&summary.acknowledged)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_skips_blank_lines() {
        assert!(parse_line("   ").is_none());
        assert!(matches!(
            parse_line(r#"{"type":"exit","code":3}"#),
            Some(Ok(record)) if record == Record::exit(3)
        ));
        assert!(matches!(parse_line("{not json"), Some(Err(_))));
    }

    #[tokio::test]
    async fn test_load_offsets_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, r#"{"history": 12, "output": 3}"#).unwrap();

        let offsets = load_offsets(&path).await.unwrap();
        assert_eq!(offsets.get(&crate::domain::Substream::History), 12);
        assert_eq!(offsets.get(&crate::domain::Substream::Output), 3);

        assert!(load_offsets(&dir.path().join("missing.json")).await.is_err());
    }
}
