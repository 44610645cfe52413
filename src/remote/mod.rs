//! Interface to the remote append-only log store.
//!
//! The poller only needs two calls: list the streams of a group (optionally
//! by name prefix) and read events forward from a token or a timestamp.

pub mod aws;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aws::AwsLogStore;
pub use http::HttpLogStore;
pub use memory::{MemoryLogStore, Operation};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log store returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("AWS request failed: {0}")]
    Sdk(String),

    #[error("invalid remote configuration: {0}")]
    Config(String),

    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// One event as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

/// Where a forward read begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStart {
    /// Oldest retained event of the stream.
    Head,
    /// Opaque forward token from a previous page.
    Token(String),
    /// First event at or after this millisecond timestamp.
    Time(i64),
}

impl EventStart {
    /// The `(nextToken, startTime)` request parameters for this start.
    pub fn request_params(&self) -> (Option<&str>, Option<i64>) {
        match self {
            EventStart::Head => (None, None),
            EventStart::Token(token) => (Some(token.as_str()), None),
            EventStart::Time(ms) => (None, Some(*ms)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPage {
    pub streams: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub next_forward_token: Option<String>,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn list_log_streams(
        &self,
        group: &str,
        prefix: Option<&str>,
        next_token: Option<&str>,
    ) -> Result<StreamPage>;

    async fn get_log_events(&self, group: &str, stream: &str, start: &EventStart)
        -> Result<EventPage>;
}
