use crate::domain::{OffsetMap, Substream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Lines appended to one named file, starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub offset: i64,
    pub content: Vec<String>,
}

/// One HTTP uplink payload.
///
/// A request is a delta: `offsets` holds, per substream, the position of the
/// first row carried here, and the collector appends rather than replaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStreamRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub console: BTreeMap<i64, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileChunk>,
    #[serde(default, skip_serializing_if = "OffsetMap::is_empty")]
    pub offsets: OffsetMap,
    #[serde(default)]
    pub exitcode: Option<i32>,
    #[serde(default)]
    pub complete: bool,
}

impl FileStreamRequest {
    /// True for a request with nothing to say; heartbeats look like this.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
            && self.events.is_empty()
            && self.output.is_empty()
            && self.console.is_empty()
            && self.summary.is_none()
            && self.files.is_empty()
            && self.exitcode.is_none()
            && !self.complete
    }

    pub fn line_count(&self) -> usize {
        self.history.len()
            + self.events.len()
            + self.output.len()
            + self.console.len()
            + self.files.values().map(|f| f.content.len()).sum::<usize>()
    }
}

/// A merge operation against the pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferMutation {
    AppendHistory { line: String, offset: Option<i64> },
    AppendEvent { line: String, offset: Option<i64> },
    AppendOutput { line: String, offset: Option<i64> },
    SetConsoleLine { line_number: i64, content: String },
    MergeSummary { values: Map<String, Value> },
    AppendFile { name: String, lines: Vec<String>, offset: Option<i64> },
    Exit { code: i32 },
    /// Record bytes fully applied; carried with the next snapshot.
    Account { bytes: u64 },
}

impl BufferMutation {
    /// Substream the mutation writes to, if any.
    pub fn target(&self) -> Option<Substream> {
        match self {
            BufferMutation::AppendHistory { .. } => Some(Substream::History),
            BufferMutation::AppendEvent { .. } => Some(Substream::Events),
            BufferMutation::AppendOutput { .. } => Some(Substream::Output),
            BufferMutation::SetConsoleLine { .. } => Some(Substream::Console),
            BufferMutation::MergeSummary { .. } => Some(Substream::Summary),
            BufferMutation::AppendFile { name, .. } => Some(Substream::File(name.clone())),
            BufferMutation::Exit { .. } | BufferMutation::Account { .. } => None,
        }
    }
}

/// A snapshot released by the collect stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitBatch {
    pub request: FileStreamRequest,
    /// Record bytes accounted by this snapshot.
    pub bytes: u64,
    /// Positions reached once this request is written.
    pub end_offsets: OffsetMap,
}

/// Rows of one appended substream waiting for release, each at its
/// producer position.
#[derive(Debug, Default)]
struct PendingRows {
    rows: Vec<(i64, String)>,
}

impl PendingRows {
    /// Position right after the last pending row, or `next` when empty.
    fn end(&self, next: i64) -> i64 {
        self.rows
            .last()
            .map_or(next, |(position, _)| position.saturating_add(1))
    }

    fn push(&mut self, position: i64, line: String) {
        self.rows.push((position, line));
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Takes at most `max` rows that sit at consecutive positions, starting
    /// with the oldest. A gap ends the run; the rest waits for the next
    /// snapshot.
    fn take_run(&mut self, max: usize) -> Option<(i64, Vec<String>)> {
        let start = self.rows.first()?.0;
        let run = self
            .rows
            .iter()
            .take(max)
            .enumerate()
            .take_while(|(i, (position, _))| *position == start.saturating_add(*i as i64))
            .count();
        let lines = self.rows.drain(..run).map(|(_, line)| line).collect();
        Some((start, lines))
    }
}

/// The evolving pending request owned by the collect stage.
#[derive(Debug)]
pub struct RequestBuffer {
    next: OffsetMap,
    console_floor: i64,
    history: PendingRows,
    events: PendingRows,
    output: PendingRows,
    console: BTreeMap<i64, String>,
    summary: Map<String, Value>,
    summary_dirty: bool,
    last_sent_summary: Option<Map<String, Value>>,
    files: BTreeMap<String, PendingRows>,
    exit_code: Option<i32>,
    exit_sent: bool,
    pending_bytes: u64,
    max_lines: usize,
    duplicates: u64,
}

impl RequestBuffer {
    pub fn new(initial_offsets: OffsetMap, max_lines: usize) -> Self {
        Self {
            console_floor: initial_offsets.get(&Substream::Console),
            next: initial_offsets,
            history: PendingRows::default(),
            events: PendingRows::default(),
            output: PendingRows::default(),
            console: BTreeMap::new(),
            summary: Map::new(),
            summary_dirty: false,
            last_sent_summary: None,
            files: BTreeMap::new(),
            exit_code: None,
            exit_sent: false,
            pending_bytes: 0,
            max_lines: max_lines.max(1),
            duplicates: 0,
        }
    }

    pub fn apply(&mut self, mutation: BufferMutation) {
        match mutation {
            BufferMutation::AppendHistory { line, offset } => {
                self.append(Substream::History, line, offset);
            }
            BufferMutation::AppendEvent { line, offset } => {
                self.append(Substream::Events, line, offset);
            }
            BufferMutation::AppendOutput { line, offset } => {
                self.append(Substream::Output, line, offset);
            }
            BufferMutation::SetConsoleLine {
                line_number,
                content,
            } => {
                if line_number < self.console_floor {
                    self.duplicates += 1;
                    debug!(line_number, "dropping console line from a previous session");
                } else {
                    self.console.insert(line_number, content);
                }
            }
            BufferMutation::MergeSummary { values } => {
                self.summary.extend(values);
                self.summary_dirty = true;
            }
            BufferMutation::AppendFile {
                name,
                lines,
                offset,
            } => self.append_file(name, lines, offset),
            BufferMutation::Exit { code } => {
                if !self.exit_sent {
                    self.exit_code = Some(code);
                }
            }
            BufferMutation::Account { bytes } => self.pending_bytes += bytes,
        }
    }

    fn pending_mut(&mut self, substream: &Substream) -> &mut PendingRows {
        match substream {
            Substream::Events => &mut self.events,
            Substream::Output => &mut self.output,
            _ => &mut self.history,
        }
    }

    /// Queues `line` at the producer's `offset`, or right after the last
    /// known row when the producer gave none. Offsets ahead of that skip
    /// the substream position forward.
    fn append(&mut self, substream: Substream, line: String, offset: Option<i64>) {
        let next = self.next.get(&substream);
        let expected = self.pending_mut(&substream).end(next);
        let position = match offset {
            Some(offset) if offset < expected => {
                self.duplicates += 1;
                debug!(%substream, offset, expected, "dropping already accounted row");
                return;
            }
            Some(offset) => {
                if offset > expected {
                    debug!(%substream, offset, expected, "gap in producer offsets, skipping ahead");
                }
                offset
            }
            None => expected,
        };
        self.pending_mut(&substream).push(position, line);
    }

    fn append_file(&mut self, name: String, mut lines: Vec<String>, offset: Option<i64>) {
        let substream = Substream::File(name.clone());
        let next = self.next.get(&substream);
        let pending = self.files.entry(name).or_default();
        let expected = pending.end(next);
        let mut start = offset.unwrap_or(expected);
        if start < expected {
            let overlap = usize::try_from(expected.saturating_sub(start))
                .unwrap_or(usize::MAX)
                .min(lines.len());
            self.duplicates += overlap as u64;
            debug!(%substream, offset = start, expected, overlap, "dropping already accounted file lines");
            lines.drain(..overlap);
            start = expected;
        } else if start > expected {
            debug!(%substream, offset = start, expected, "gap in file offsets, skipping ahead");
        }
        for (i, line) in lines.into_iter().enumerate() {
            pending.push(start.saturating_add(i as i64), line);
        }
    }

    fn has_pending_content(&self) -> bool {
        !self.history.is_empty()
            || !self.events.is_empty()
            || !self.output.is_empty()
            || !self.console.is_empty()
            || self.files.values().any(|rows| !rows.is_empty())
            || (self.summary_dirty && self.last_sent_summary.as_ref() != Some(&self.summary))
    }

    /// Whether a snapshot taken now would carry anything.
    pub fn has_changes(&self) -> bool {
        self.has_pending_content()
            || (self.exit_code.is_some() && !self.exit_sent)
            || self.pending_bytes > 0
    }

    /// Rows dropped because an earlier session or request already had them.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Releases the pending state as one request, or `None` when nothing
    /// changed since the previous snapshot.
    ///
    /// At most `max_lines` lines of each substream are taken; the rest stays
    /// pending. The exit code is only attached once no content is left.
    pub fn take_snapshot(&mut self) -> Option<TransmitBatch> {
        if !self.has_changes() {
            return None;
        }

        let mut request = FileStreamRequest::default();
        for substream in [Substream::History, Substream::Events, Substream::Output] {
            let max_lines = self.max_lines;
            let Some((start, lines)) = self.pending_mut(&substream).take_run(max_lines) else {
                continue;
            };
            request.offsets.advance(substream.clone(), start);
            self.next
                .advance(substream.clone(), start.saturating_add(lines.len() as i64));
            match substream {
                Substream::History => request.history = lines,
                Substream::Events => request.events = lines,
                _ => request.output = lines,
            }
        }

        let console_lines: Vec<i64> = self.console.keys().take(self.max_lines).copied().collect();
        for line_number in console_lines {
            if let Some(content) = self.console.remove(&line_number) {
                request.console.insert(line_number, content);
            }
        }
        if let (Some(first), Some(last)) = (request.console.keys().next(), request.console.keys().last()) {
            request.offsets.advance(Substream::Console, *first);
            self.next.advance(Substream::Console, last.saturating_add(1));
        }

        if self.summary_dirty {
            self.summary_dirty = false;
            if self.last_sent_summary.as_ref() != Some(&self.summary) {
                request
                    .offsets
                    .advance(Substream::Summary, self.next.get(&Substream::Summary));
                self.next.advance_by(Substream::Summary, 1);
                self.last_sent_summary = Some(self.summary.clone());
                request.summary = Some(self.summary.clone());
            }
        }

        for (name, pending) in &mut self.files {
            let Some((start, content)) = pending.take_run(self.max_lines) else {
                continue;
            };
            let substream = Substream::File(name.clone());
            self.next
                .advance(substream, start.saturating_add(content.len() as i64));
            request.files.insert(name.clone(), FileChunk { offset: start, content });
        }
        self.files.retain(|_, pending| !pending.is_empty());

        if self.exit_code.is_some() && !self.exit_sent && !self.has_pending_content() {
            request.exitcode = self.exit_code;
            request.complete = true;
            self.exit_sent = true;
        }

        Some(TransmitBatch {
            request,
            bytes: std::mem::take(&mut self.pending_bytes),
            end_offsets: self.next.clone(),
        })
    }
}
