//! Delivery outcomes and the exit codes editor plugins key off.

use std::fmt;

/// Process exit codes. Plugins only surface "check your API key" on
/// [`exit_code::ERR_AUTH`], and treat [`exit_code::ERR_BACKOFF`] as deferred.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ERR_GENERIC: i32 = 1;
    pub const ERR_API: i32 = 102;
    pub const ERR_CONFIG_PARSE: i32 = 103;
    pub const ERR_AUTH: i32 = 104;
    pub const ERR_BACKOFF: i32 = 112;
}

/// Classified result of one bulk delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    Success,
    Unauthorized,
    BadRequest,
    RateLimited,
    TransientNetwork,
    ServerError,
}

impl ErrorOutcome {
    /// Whether the heartbeats should stay queued for a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorOutcome::RateLimited | ErrorOutcome::TransientNetwork | ErrorOutcome::ServerError
        )
    }

    /// Whether this outcome lengthens the backoff window. Terminal errors say
    /// nothing about endpoint availability, so they leave backoff alone.
    pub fn escalates_backoff(self) -> bool {
        self.is_retryable()
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ErrorOutcome::Success => exit_code::SUCCESS,
            ErrorOutcome::Unauthorized => exit_code::ERR_AUTH,
            ErrorOutcome::BadRequest => exit_code::ERR_GENERIC,
            ErrorOutcome::RateLimited => exit_code::ERR_BACKOFF,
            ErrorOutcome::TransientNetwork | ErrorOutcome::ServerError => exit_code::ERR_API,
        }
    }
}

impl fmt::Display for ErrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorOutcome::Success => "success",
            ErrorOutcome::Unauthorized => "unauthorized",
            ErrorOutcome::BadRequest => "bad_request",
            ErrorOutcome::RateLimited => "rate_limited",
            ErrorOutcome::TransientNetwork => "transient_network",
            ErrorOutcome::ServerError => "server_error",
        };
        f.write_str(label)
    }
}

/// User-facing delivery failure, one variant per exit-code class.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid api key... find yours in your pulse dashboard settings. {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited: {0}")]
    Backoff(String),

    #[error("api error: {0}")]
    Api(String),
}

impl DeliveryError {
    /// Maps a non-success outcome to its error; `None` for success.
    pub fn from_outcome(outcome: ErrorOutcome, detail: impl Into<String>) -> Option<Self> {
        let detail = detail.into();
        match outcome {
            ErrorOutcome::Success => None,
            ErrorOutcome::Unauthorized => Some(DeliveryError::Auth(detail)),
            ErrorOutcome::BadRequest => Some(DeliveryError::BadRequest(detail)),
            ErrorOutcome::RateLimited => Some(DeliveryError::Backoff(detail)),
            ErrorOutcome::TransientNetwork | ErrorOutcome::ServerError => {
                Some(DeliveryError::Api(detail))
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            DeliveryError::Auth(_) => exit_code::ERR_AUTH,
            DeliveryError::BadRequest(_) => exit_code::ERR_GENERIC,
            DeliveryError::Backoff(_) => exit_code::ERR_BACKOFF,
            DeliveryError::Api(_) => exit_code::ERR_API,
        }
    }
}
