pub mod client;
pub mod stats;
pub mod transmission;

pub use client::{
    ApiClient, ApiRequest, ApiResponse, ClientConfig, ClientError, ClientStats, ConnectionStats,
    HttpClient,
};
pub use stats::{UplinkStats, UplinkStatsSnapshot};
pub use transmission::{SendError, StreamSender};
