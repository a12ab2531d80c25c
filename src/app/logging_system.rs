use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log directive '{0}'")]
    InvalidDirective(String),
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// One `target=level` filter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    target: String,
    level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    /// Parses `target=level`; an unknown level is reported separately so the
    /// caller can fall back to its default.
    fn parse(directive: &str) -> Result<Self, DirectiveFault> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(DirectiveFault::Malformed);
        };
        let target = target.trim();
        if target.is_empty() {
            return Err(DirectiveFault::Malformed);
        }
        level
            .trim()
            .parse()
            .map(|level| Self::new(target, level))
            .map_err(|_| DirectiveFault::UnknownLevel(target.to_string()))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

enum DirectiveFault {
    Malformed,
    UnknownLevel(String),
}

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
            fallback_level: LogLevel::Info,
        }
    }

    /// Adds a `target=level` directive.
    ///
    /// Malformed directives are skipped, unknown levels fall back to `info`.
    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        match LogDirective::parse(directive) {
            Ok(parsed) => self.directives.write().push(parsed),
            Err(DirectiveFault::UnknownLevel(target)) => {
                eprintln!("Warning: invalid level in '{directive}', using default level");
                self.directives
                    .write()
                    .push(LogDirective::new(target, self.fallback_level));
            }
            Err(DirectiveFault::Malformed) => {
                eprintln!("Warning: {}, skipping directive", LoggingError::InvalidDirective(directive.to_string()));
            }
        }
        Ok(())
    }

    /// Quiets the HTTP stack below `warn`.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "reqwest", "h2"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    /// Installs the global subscriber. Logs go to stderr; stdout belongs to
    /// the binary's result output.
    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            LoggingError::InitFailed(format!("bad filter '{filter_string}': {e}"))
        })?;

        let (text, json) = match format {
            LogFormat::Text => (
                Some(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true)
                        .compact(),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .json(),
                ),
            ),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(text)
            .with(json)
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(LogDirective::to_filter_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs logging once per process; later calls report the first outcome.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(LoggingError::InitFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_valid_directive() {
        let logging_system = LoggingSystem::new();

        logging_system.add_directive("hyper=warn").unwrap();
        logging_system.add_directive("filestream_uplink=debug").unwrap();

        assert_eq!(logging_system.directive_count(), 2);
    }

    #[test]
    fn test_fallback_strategies() {
        let logging_system = LoggingSystem::new();

        let test_cases = vec![
            ("hyper=warn", 1),
            ("invalid_format", 1),
            ("target=invalid_level", 2),
            ("=empty", 2),
            ("", 2),
        ];

        for (directive, expected_count) in test_cases {
            assert!(logging_system.add_directive(directive).is_ok());
            assert_eq!(
                logging_system.directive_count(),
                expected_count,
                "Directive: {directive}"
            );
        }
        assert!(
            logging_system
                .build_filter_string(LogLevel::Warn)
                .contains("target=info")
        );
    }

    #[test]
    fn test_build_filter_string() {
        let logging_system = LoggingSystem::new();
        assert_eq!(logging_system.build_filter_string(LogLevel::Info), "info");

        logging_system.add_default_directives();
        assert_eq!(
            logging_system.build_filter_string(LogLevel::Debug),
            "debug,hyper=warn,reqwest=warn,h2=warn"
        );
    }

    #[test]
    fn test_concurrent_directive_modification() {
        let logging_system = Arc::new(LoggingSystem::new());

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let logging_system = logging_system.clone();
                thread::spawn(move || {
                    logging_system.add_directive(&format!("target{i}=info")).unwrap();
                    logging_system.build_filter_string(LogLevel::Info)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert_eq!(logging_system.directive_count(), 50);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        let first = setup_logging(LogLevel::Info, LogFormat::Text);
        let second = setup_logging(LogLevel::Debug, LogFormat::Json);
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
