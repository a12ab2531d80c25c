//! Nested configuration groups.
//!
//! Each group is owned by the module it configures; the flat CLI fields of
//! [`super::Config`] are folded into them by `post_process`.

pub use crate::filestream::FileStreamSettings;
pub use crate::flow_control::FlowControlPolicy;
pub use crate::monitor::MonitorConfig;
pub use crate::reliability::RetryConfig;
pub use crate::sender::ClientConfig;
