use super::offsets::Substream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which console stream an output line came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

/// One atomic telemetry event produced by the instrumented process.
///
/// Records are immutable once created. `offset` is the producer-assigned
/// position inside the record's substream; when present it lets the pipeline
/// recognise rows that a previous session already accounted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    /// A metrics row, expected to be a JSON object.
    History { row: Value },
    /// An aggregated system-metrics sample from the resource monitor.
    Stats {
        metrics: BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    },
    /// A line written to stdout/stderr.
    Output {
        line: String,
        #[serde(default)]
        stream: OutputStream,
    },
    /// A terminal update addressing one console line.
    Console { line_number: i64, content: String },
    /// Summary values to merge, last writer wins per key.
    Summary { values: Map<String, Value> },
    /// New lines appended to a named file.
    FileChunk { name: String, lines: Vec<String> },
    /// Run configuration; owned by an external registry.
    Config { values: Map<String, Value> },
    /// Process exit; the final record of a run.
    Exit { code: i32 },
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self { kind, offset: None }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn history(row: Value) -> Self {
        Self::new(RecordKind::History { row })
    }

    pub fn output(line: impl Into<String>) -> Self {
        Self::new(RecordKind::Output {
            line: line.into(),
            stream: OutputStream::Stdout,
        })
    }

    pub fn stats(metrics: BTreeMap<String, f64>, timestamp: DateTime<Utc>) -> Self {
        Self::new(RecordKind::Stats { metrics, timestamp })
    }

    pub fn exit(code: i32) -> Self {
        Self::new(RecordKind::Exit { code })
    }

    /// Short type tag used in logs.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            RecordKind::History { .. } => "history",
            RecordKind::Stats { .. } => "stats",
            RecordKind::Output { .. } => "output",
            RecordKind::Console { .. } => "console",
            RecordKind::Summary { .. } => "summary",
            RecordKind::FileChunk { .. } => "file_chunk",
            RecordKind::Config { .. } => "config",
            RecordKind::Exit { .. } => "exit",
        }
    }

    /// Substream the record's data lands in, if any.
    pub fn substream(&self) -> Option<Substream> {
        match &self.kind {
            RecordKind::History { .. } => Some(Substream::History),
            RecordKind::Stats { .. } => Some(Substream::Events),
            RecordKind::Output { .. } => Some(Substream::Output),
            RecordKind::Console { .. } => Some(Substream::Console),
            RecordKind::Summary { .. } => Some(Substream::Summary),
            RecordKind::FileChunk { name, .. } => Some(Substream::File(name.clone())),
            RecordKind::Config { .. } | RecordKind::Exit { .. } => None,
        }
    }

    /// Rough estimate of the record's serialized size in bytes.
    ///
    /// Flow control measures backlog in these units, so the estimate only has
    /// to be stable, not exact. Never returns 0.
    pub fn size_bytes(&self) -> u64 {
        let base = std::mem::size_of::<Record>();
        let payload = match &self.kind {
            RecordKind::History { row } => estimate_value_size(row),
            RecordKind::Stats { metrics, .. } => metrics.keys().map(|k| k.len() + 8).sum(),
            RecordKind::Output { line, .. } => line.len(),
            RecordKind::Console { content, .. } => content.len() + 8,
            RecordKind::Summary { values } | RecordKind::Config { values } => values
                .iter()
                .map(|(k, v)| k.len() + estimate_value_size(v))
                .sum(),
            RecordKind::FileChunk { name, lines } => {
                name.len() + lines.iter().map(String::len).sum::<usize>()
            }
            RecordKind::Exit { .. } => 4,
        };
        (base + payload) as u64
    }
}

fn estimate_value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 5,
        Value::Number(_) => 8,
        Value::String(s) => s.len() + 2,
        Value::Array(items) => items.iter().map(estimate_value_size).sum::<usize>() + 2,
        Value::Object(map) => {
            map.iter()
                .map(|(k, v)| k.len() + 3 + estimate_value_size(v))
                .sum::<usize>()
                + 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_parses_from_ndjson_line() {
        let line = r#"{"type":"history","row":{"loss":0.5,"_step":3},"offset":3}"#;
        let record: Record = serde_json::from_str(line).unwrap();

        assert_eq!(record.offset, Some(3));
        assert_eq!(record.substream(), Some(Substream::History));
        match record.kind {
            RecordKind::History { row } => assert_eq!(row["loss"], json!(0.5)),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_output_stream_defaults_to_stdout() {
        let record: Record = serde_json::from_str(r#"{"type":"output","line":"hello"}"#).unwrap();
        assert_eq!(
            record.kind,
            RecordKind::Output {
                line: "hello".to_string(),
                stream: OutputStream::Stdout
            }
        );
        assert_eq!(record.offset, None);
    }

    #[test]
    fn test_size_grows_with_payload() {
        let small = Record::output("a");
        let large = Record::output("a".repeat(1000));
        assert!(small.size_bytes() > 0);
        assert!(large.size_bytes() >= small.size_bytes() + 999);
    }

    #[test]
    fn test_config_and_exit_have_no_substream() {
        assert_eq!(Record::exit(0).substream(), None);
        let config = Record::new(RecordKind::Config { values: Map::new() });
        assert_eq!(config.substream(), None);
    }
}
