//! Domain layer for filestream-uplink.
//!
//! Contains the canonical types shared across all modules:
//! - `Record`: one telemetry event handed over by the instrumented process
//! - `OffsetMap`: last accounted position per substream
//! - `UplinkError`: Top-level error type

pub mod error;
pub mod offsets;
pub mod record;

pub use error::UplinkError;
pub use offsets::{OffsetMap, Substream};
pub use record::{OutputStream, Record, RecordKind};
