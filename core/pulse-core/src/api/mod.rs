//! Heartbeat API: the sending seam, its HTTP implementation, and the
//! classification of attempts into retry decisions.

mod classify;
mod client;
mod outcome;

pub use classify::{classify, classify_status, partition_accepted, Partition};
pub use client::{parse_retry_after, user_agent, ApiClient};
pub use outcome::{exit_code, DeliveryError, ErrorOutcome};

use std::fmt;
use std::time::Duration;

use pulse_protocol::Heartbeat;

/// Why a request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Connect(String),
    Timeout(String),
    Other(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Connect(msg) => write!(f, "connection failed: {msg}"),
            TransportFailure::Timeout(msg) => write!(f, "request timed out: {msg}"),
            TransportFailure::Other(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when the server sent one.
    pub retry_after: Option<Duration>,
}

/// Raw result of one bulk request, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Transport(TransportFailure),
    Response(ApiResponse),
}

impl AttemptResult {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptResult::Response(response) => response.retry_after,
            AttemptResult::Transport(_) => None,
        }
    }

    /// Short description for logs and user-facing messages.
    pub fn describe(&self) -> String {
        match self {
            AttemptResult::Transport(failure) => failure.to_string(),
            AttemptResult::Response(response) => {
                let snippet: String = response.body.chars().take(200).collect();
                if snippet.trim().is_empty() {
                    format!("status {}", response.status)
                } else {
                    format!("status {}: {}", response.status, snippet.trim())
                }
            }
        }
    }
}

/// Sends one batch of heartbeats. Implementations never panic and report
/// every failure through [`AttemptResult`].
pub trait HeartbeatSender {
    fn send(&self, heartbeats: &[Heartbeat]) -> AttemptResult;
}
