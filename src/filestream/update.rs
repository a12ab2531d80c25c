use super::FileStreamSettings;
use super::request::BufferMutation;
use crate::domain::OffsetMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("history row must be a JSON object, got {0}")]
    InvalidHistoryRow(&'static str),
    #[error("file chunk has an empty file name")]
    EmptyFileName,
    #[error("failed to encode {kind} update: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// User-facing messages raised while applying updates.
#[derive(Debug, Clone, Default)]
pub struct Printer {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "filestream::printer", "{message}");
        self.messages.lock().push(message);
    }

    /// Takes every message written so far.
    pub fn read(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

/// Everything an [`Update`] may touch while applying itself.
pub struct UpdateContext<'a> {
    mutations: &'a mut Vec<BufferMutation>,
    settings: &'a FileStreamSettings,
    initial_offsets: &'a OffsetMap,
    printer: &'a Printer,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        mutations: &'a mut Vec<BufferMutation>,
        settings: &'a FileStreamSettings,
        initial_offsets: &'a OffsetMap,
        printer: &'a Printer,
    ) -> Self {
        Self {
            mutations,
            settings,
            initial_offsets,
            printer,
        }
    }

    /// Queues a change to the pending request.
    pub fn modify(&mut self, mutation: BufferMutation) {
        self.mutations.push(mutation);
    }

    pub fn settings(&self) -> &FileStreamSettings {
        self.settings
    }

    /// Offsets the session was seeded with.
    pub fn initial_offsets(&self) -> &OffsetMap {
        self.initial_offsets
    }

    pub fn printer(&self) -> &Printer {
        self.printer
    }
}

/// A unit of work that merges one record's effect into the pending request.
///
/// Mutations emitted through the context are only committed when `apply`
/// returns `Ok`; a failing update leaves the request untouched.
pub trait Update: Send + fmt::Debug + 'static {
    fn apply(self: Box<Self>, ctx: &mut UpdateContext<'_>) -> Result<(), UpdateError>;

    /// Record bytes this update accounts for once applied.
    fn weight(&self) -> u64 {
        0
    }
}
