#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Durations and byte counts stay far below u64::MAX
    clippy::cast_possible_wrap,       // Line counts never approach i64::MAX
    clippy::cast_precision_loss,      // Acceptable for averaged samples and rates
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. FileStreamSettings in filestream module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod domain;
pub mod filestream;
pub mod filetransfer;
pub mod flow_control;
pub mod monitor;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use app::{App, Config};
pub use domain::{OffsetMap, Record, RecordKind, Substream, UplinkError};
pub use filestream::{FileStream, FileStreamSettings, UpdateSender};
pub use flow_control::{FlowControl, FlowControlPolicy, GateState};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
