//! One [`Update`] per record kind.

use super::request::BufferMutation;
use super::update::{Update, UpdateContext, UpdateError};
use crate::domain::{OutputStream, Record, RecordKind};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const STDERR_PREFIX: &str = "ERROR ";

/// Builds the update for `record`.
pub fn from_record(record: Record) -> Box<dyn Update> {
    let weight = record.size_bytes();
    let offset = record.offset;
    match record.kind {
        RecordKind::History { row } => Box::new(HistoryUpdate {
            row,
            offset,
            weight,
        }),
        RecordKind::Stats { metrics, timestamp } => Box::new(StatsUpdate {
            metrics,
            timestamp,
            offset,
            weight,
        }),
        RecordKind::Output { line, stream } => Box::new(OutputUpdate {
            line,
            stream,
            offset,
            weight,
        }),
        RecordKind::Console {
            line_number,
            content,
        } => Box::new(ConsoleUpdate {
            line_number,
            content,
            weight,
        }),
        RecordKind::Summary { values } => Box::new(SummaryUpdate { values, weight }),
        RecordKind::FileChunk { name, lines } => Box::new(FileChunkUpdate {
            name,
            lines,
            offset,
            weight,
        }),
        RecordKind::Config { values } => Box::new(ConfigUpdate {
            keys: values.len(),
            weight,
        }),
        RecordKind::Exit { code } => Box::new(ExitUpdate { code, weight }),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug)]
pub struct HistoryUpdate {
    pub row: Value,
    pub offset: Option<i64>,
    pub weight: u64,
}

impl Update for HistoryUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        if !self.row.is_object() {
            return Err(UpdateError::InvalidHistoryRow(value_type(&self.row)));
        }
        let line = serde_json::to_string(&self.row).map_err(|source| UpdateError::Encode {
            kind: "history",
            source,
        })?;
        ctx.modify(BufferMutation::AppendHistory {
            line,
            offset: self.offset,
        });
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

/// An aggregated system-metrics sample, written to the events substream.
#[derive(Debug)]
pub struct StatsUpdate {
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    pub offset: Option<i64>,
    pub weight: u64,
}

impl Update for StatsUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        let mut row = Map::new();
        let mut skipped = Vec::new();
        for (name, value) in self.metrics {
            match serde_json::Number::from_f64(value) {
                Some(number) => {
                    row.insert(format!("system.{name}"), Value::Number(number));
                }
                None => skipped.push(name),
            }
        }
        if !skipped.is_empty() {
            warn!(metrics = ?skipped, "skipping non-finite system metrics");
            ctx.printer()
                .write(format!("Skipped non-finite system metrics: {}", skipped.join(", ")));
        }
        let seconds = self.timestamp.timestamp_micros() as f64 / 1e6;
        if let Some(number) = serde_json::Number::from_f64(seconds) {
            row.insert("_timestamp".to_string(), Value::Number(number));
        }
        row.insert("_wandb".to_string(), Value::Bool(true));

        let line = serde_json::to_string(&row).map_err(|source| UpdateError::Encode {
            kind: "stats",
            source,
        })?;
        ctx.modify(BufferMutation::AppendEvent {
            line,
            offset: self.offset,
        });
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[derive(Debug)]
pub struct OutputUpdate {
    pub line: String,
    pub stream: OutputStream,
    pub offset: Option<i64>,
    pub weight: u64,
}

impl Update for OutputUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        let line = match self.stream {
            OutputStream::Stdout => self.line,
            OutputStream::Stderr => format!("{STDERR_PREFIX}{}", self.line),
        };
        ctx.modify(BufferMutation::AppendOutput {
            line,
            offset: self.offset,
        });
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[derive(Debug)]
pub struct ConsoleUpdate {
    pub line_number: i64,
    pub content: String,
    pub weight: u64,
}

impl Update for ConsoleUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        ctx.modify(BufferMutation::SetConsoleLine {
            line_number: self.line_number,
            content: self.content,
        });
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[derive(Debug)]
pub struct SummaryUpdate {
    pub values: Map<String, Value>,
    pub weight: u64,
}

impl Update for SummaryUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        if !self.values.is_empty() {
            ctx.modify(BufferMutation::MergeSummary {
                values: self.values,
            });
        }
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[derive(Debug)]
pub struct FileChunkUpdate {
    pub name: String,
    pub lines: Vec<String>,
    pub offset: Option<i64>,
    pub weight: u64,
}

impl Update for FileChunkUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        if self.name.is_empty() {
            return Err(UpdateError::EmptyFileName);
        }
        if !self.lines.is_empty() {
            ctx.modify(BufferMutation::AppendFile {
                name: self.name,
                lines: self.lines,
                offset: self.offset,
            });
        }
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

/// Run configuration lives in an external registry; only its bytes are
/// accounted here.
#[derive(Debug)]
pub struct ConfigUpdate {
    pub keys: usize,
    pub weight: u64,
}

impl Update for ConfigUpdate {
    fn apply(self: Box<Self>, _ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        debug!(keys = self.keys, "config record accepted");
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[derive(Debug)]
pub struct ExitUpdate {
    pub code: i32,
    pub weight: u64,
}

impl ExitUpdate {
    pub fn new(code: i32) -> Self {
        Self { code, weight: 0 }
    }
}

impl Update for ExitUpdate {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError> {
        ctx.modify(BufferMutation::Exit { code: self.code });
        Ok(())
    }

    fn weight(&self) -> u64 {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OffsetMap;
    use crate::filestream::{FileStreamSettings, Printer};
    use serde_json::json;

    fn apply(record: Record) -> (Result<(), UpdateError>, Vec<BufferMutation>, Printer) {
        let settings = FileStreamSettings::default();
        let offsets = OffsetMap::new();
        let printer = Printer::new();
        let mut mutations = Vec::new();
        let result = {
            let mut ctx = UpdateContext::new(&mut mutations, &settings, &offsets, &printer);
            from_record(record).apply(&mut ctx)
        };
        (result, mutations, printer)
    }

    #[test]
    fn test_history_row_becomes_json_line() {
        let (result, mutations, _) = apply(Record::history(json!({"loss": 0.25})).with_offset(7));

        assert!(result.is_ok());
        assert_eq!(
            mutations,
            vec![BufferMutation::AppendHistory {
                line: r#"{"loss":0.25}"#.to_string(),
                offset: Some(7),
            }]
        );
    }

    #[test]
    fn test_non_object_history_row_is_fatal() {
        let (result, mutations, _) = apply(Record::history(json!([1, 2, 3])));

        assert!(matches!(result, Err(UpdateError::InvalidHistoryRow("array"))));
        assert!(mutations.is_empty());
    }

    #[test]
    fn test_stderr_lines_are_prefixed() {
        let record = Record::new(RecordKind::Output {
            line: "boom".to_string(),
            stream: OutputStream::Stderr,
        });
        let (_, mutations, _) = apply(record);

        assert_eq!(
            mutations,
            vec![BufferMutation::AppendOutput {
                line: "ERROR boom".to_string(),
                offset: None,
            }]
        );
    }

    #[test]
    fn test_non_finite_stats_are_skipped_with_a_message() {
        let metrics = BTreeMap::from([("cpu".to_string(), 12.5), ("gpu".to_string(), f64::NAN)]);
        let (result, mutations, printer) = apply(Record::stats(metrics, Utc::now()));

        assert!(result.is_ok());
        let BufferMutation::AppendEvent { line, .. } = &mutations[0] else {
            panic!("expected an event line, got {mutations:?}");
        };
        let row: Value = serde_json::from_str(line).unwrap();
        assert_eq!(row["system.cpu"], json!(12.5));
        assert!(row.get("system.gpu").is_none());
        assert_eq!(printer.read().len(), 1);
    }

    #[test]
    fn test_empty_file_name_is_fatal() {
        let record = Record::new(RecordKind::FileChunk {
            name: String::new(),
            lines: vec!["x".to_string()],
        });
        let (result, _, _) = apply(record);
        assert!(matches!(result, Err(UpdateError::EmptyFileName)));
    }

    #[test]
    fn test_config_emits_nothing_but_has_weight() {
        let record = Record::new(RecordKind::Config {
            values: json!({"lr": 0.1}).as_object().cloned().unwrap(),
        });
        let weight = record.size_bytes();
        let update = from_record(record);
        assert_eq!(update.weight(), weight);

        let (result, mutations, _) = apply(Record::new(RecordKind::Config { values: Map::new() }));
        assert!(result.is_ok());
        assert!(mutations.is_empty());
    }
}
