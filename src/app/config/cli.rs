use super::groups::{ClientConfig, FileStreamSettings, FlowControlPolicy, MonitorConfig};
use super::serde_helpers::{load_env_path_opt, load_env_string, load_env_var};
use super::{ConfigError, LogFormat, LogLevel};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Base URL of the run's API server
    #[arg(long, env = "FILESTREAM_ENDPOINT", default_value = "http://localhost:8080/")]
    pub endpoint: String,

    /// Path of the file stream endpoint, relative to the base URL
    #[arg(long, env = "STREAM_PATH", default_value = "files/uplink/file_stream")]
    pub stream_path: String,

    /// Longest silence before an empty heartbeat request, in seconds
    #[arg(long, env = "HEARTBEAT_SECS", default_value = "30")]
    pub heartbeat_secs: u64,

    /// Minimum time between two requests in milliseconds
    #[arg(long, env = "TRANSMIT_INTERVAL_MS", default_value = "15000")]
    pub transmit_interval_ms: u64,

    /// Capacity of the queues between pipeline stages
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "1024")]
    pub queue_capacity: usize,

    /// Most lines of one substream carried by a single request
    #[arg(long, env = "MAX_REQUEST_LINES", default_value = "10000")]
    pub max_request_lines: usize,

    /// Unacknowledged bytes at which reading input pauses
    #[arg(long, env = "HIGH_WATER_BYTES", default_value = "4194304")]
    pub high_water_bytes: u64,

    /// Unacknowledged bytes below which reading resumes
    #[arg(long, env = "LOW_WATER_BYTES", default_value = "1048576")]
    pub low_water_bytes: u64,

    /// Seconds without acknowledged progress before a pause is abandoned
    #[arg(long, env = "STALL_TIMEOUT_SECS", default_value = "60")]
    pub stall_timeout_secs: u64,

    /// Records held while paused before forwarding resumes regardless
    #[arg(long, env = "MAX_HELD_RECORDS", default_value = "10000")]
    pub max_held_records: usize,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "180")]
    pub http_timeout_secs: u64,

    /// Attempts per request, including the first one
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "7")]
    pub retry_max_attempts: u32,

    /// Send request bodies uncompressed
    #[arg(long, env = "DISABLE_COMPRESSION")]
    pub disable_compression: bool,

    /// Do not sample process resources
    #[arg(long, env = "DISABLE_MONITOR")]
    pub disable_monitor: bool,

    /// Resource sampling interval in milliseconds
    #[arg(long, env = "MONITOR_SAMPLING_MS", default_value = "2000")]
    pub monitor_sampling_ms: u64,

    /// Samples averaged into one stats record
    #[arg(long, env = "SAMPLES_TO_AVERAGE", default_value = "15")]
    pub samples_to_average: u32,

    /// Seconds to wait for queued data on shutdown before cancelling
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "30")]
    pub shutdown_timeout_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Exit code reported when the run completes
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    #[serde(skip)]
    pub exit_code: i32,

    /// JSON file with offsets acknowledged by a previous session
    #[arg(long)]
    #[serde(skip)]
    pub resume_offsets: Option<PathBuf>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Derived groups (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub filestream: FileStreamSettings,

    #[serde(skip)]
    #[arg(skip)]
    pub flow_control: FlowControlPolicy,

    #[serde(skip)]
    #[arg(skip)]
    pub client: ClientConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub monitor: MonitorConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let filestream = FileStreamSettings::default();
        let flow_control = FlowControlPolicy::default();
        let client = ClientConfig::default();
        let monitor = MonitorConfig::default();
        Self {
            endpoint: client.base_url.clone(),
            stream_path: filestream.path.clone(),
            heartbeat_secs: filestream.heartbeat_interval.as_secs(),
            transmit_interval_ms: filestream.transmit_interval.as_millis() as u64,
            queue_capacity: filestream.queue_capacity,
            max_request_lines: filestream.max_request_lines,
            high_water_bytes: flow_control.high_water_bytes,
            low_water_bytes: flow_control.low_water_bytes,
            stall_timeout_secs: flow_control.stall_timeout.as_secs(),
            max_held_records: flow_control.max_held_records,
            http_timeout_secs: client.timeout.as_secs(),
            retry_max_attempts: client.retry.max_attempts,
            disable_compression: !client.enable_compression,
            disable_monitor: !monitor.enabled,
            monitor_sampling_ms: monitor.sampling_interval.as_millis() as u64,
            samples_to_average: monitor.samples_to_average,
            shutdown_timeout_secs: 30,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            exit_code: 0,
            resume_offsets: None,
            config_file: None,
            filestream,
            flow_control,
            client,
            monitor,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Parses command-line arguments (with env fallbacks).
    ///
    /// When `--config-file` is given the file replaces the flag values, except
    /// for the per-run arguments `--exit-code` and `--resume-offsets`.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Config::parse_from(args);
        let mut config = match &cli.config_file {
            Some(path) => {
                let mut from_file = Self::from_file(path)?;
                from_file.exit_code = cli.exit_code;
                from_file.resume_offsets = cli.resume_offsets.clone();
                from_file.config_file = cli.config_file.clone();
                from_file
            }
            None => cli,
        };
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("FILESTREAM_ENDPOINT", &mut config.endpoint);
        load_env_string("STREAM_PATH", &mut config.stream_path);
        load_env_var("HEARTBEAT_SECS", &mut config.heartbeat_secs)?;
        load_env_var("TRANSMIT_INTERVAL_MS", &mut config.transmit_interval_ms)?;
        load_env_var("QUEUE_CAPACITY", &mut config.queue_capacity)?;
        load_env_var("MAX_REQUEST_LINES", &mut config.max_request_lines)?;
        load_env_var("HIGH_WATER_BYTES", &mut config.high_water_bytes)?;
        load_env_var("LOW_WATER_BYTES", &mut config.low_water_bytes)?;
        load_env_var("STALL_TIMEOUT_SECS", &mut config.stall_timeout_secs)?;
        load_env_var("MAX_HELD_RECORDS", &mut config.max_held_records)?;
        load_env_var("HTTP_TIMEOUT_SECS", &mut config.http_timeout_secs)?;
        load_env_var("RETRY_MAX_ATTEMPTS", &mut config.retry_max_attempts)?;
        load_env_var("DISABLE_COMPRESSION", &mut config.disable_compression)?;
        load_env_var("DISABLE_MONITOR", &mut config.disable_monitor)?;
        load_env_var("MONITOR_SAMPLING_MS", &mut config.monitor_sampling_ms)?;
        load_env_var("SAMPLES_TO_AVERAGE", &mut config.samples_to_average)?;
        load_env_var("SHUTDOWN_TIMEOUT_SECS", &mut config.shutdown_timeout_secs)?;
        load_env_var("LOG_LEVEL", &mut config.log_level)?;

        // LogFormat has no FromStr; clap's ValueEnum does the matching
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.log_format = <LogFormat as clap::ValueEnum>::from_str(&format, true)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {format}")))?;
        }
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Folds the flat fields into the nested groups.
    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.filestream = FileStreamSettings {
            path: self.stream_path.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            transmit_interval: Duration::from_millis(self.transmit_interval_ms),
            queue_capacity: self.queue_capacity,
            max_request_lines: self.max_request_lines,
        };

        self.flow_control = FlowControlPolicy {
            high_water_bytes: self.high_water_bytes,
            low_water_bytes: self.low_water_bytes,
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            max_held_records: self.max_held_records,
        };

        self.client.base_url = self.endpoint.clone();
        self.client.timeout = Duration::from_secs(self.http_timeout_secs);
        self.client.enable_compression = !self.disable_compression;
        self.client.retry.max_attempts = self.retry_max_attempts;

        self.monitor = MonitorConfig {
            enabled: !self.disable_monitor,
            sampling_interval: Duration::from_millis(self.monitor_sampling_ms),
            samples_to_average: self.samples_to_average,
        };

        self.shutdown_timeout = Duration::from_secs(self.shutdown_timeout_secs);
        Ok(())
    }
}
