//! Maps delivery attempts to outcomes.

use pulse_protocol::{parse_bulk_statuses, Heartbeat, IdentityKey};

use super::outcome::ErrorOutcome;
use super::AttemptResult;

/// Classifies a completed attempt. Rules apply in priority order:
/// transport failure, 401/403, 400/422, 429, 5xx, 2xx, anything else.
pub fn classify(attempt: &AttemptResult) -> ErrorOutcome {
    match attempt {
        AttemptResult::Transport(_) => ErrorOutcome::TransientNetwork,
        AttemptResult::Response(response) => classify_status(response.status),
    }
}

pub fn classify_status(status: u16) -> ErrorOutcome {
    match status {
        401 | 403 => ErrorOutcome::Unauthorized,
        400 | 422 => ErrorOutcome::BadRequest,
        429 => ErrorOutcome::RateLimited,
        500..=599 => ErrorOutcome::ServerError,
        200..=299 => ErrorOutcome::Success,
        // Unrecognized statuses are generic API failures; retry them.
        _ => ErrorOutcome::ServerError,
    }
}

/// Per-heartbeat verdicts from a successful bulk response.
#[derive(Debug, Default, PartialEq)]
pub struct Partition {
    /// Stored by the server; remove from the queue.
    pub accepted: Vec<IdentityKey>,
    /// Terminally rejected; remove from the queue, retrying would repeat the failure.
    pub rejected: Vec<IdentityKey>,
    /// Transiently refused; keep queued.
    pub retained: Vec<IdentityKey>,
}

impl Partition {
    /// Keys that must leave the queue.
    pub fn removable(&self) -> Vec<IdentityKey> {
        self.accepted
            .iter()
            .chain(self.rejected.iter())
            .cloned()
            .collect()
    }
}

/// Splits a successfully delivered batch by per-item status.
///
/// Bodies without a per-item list, or whose list length does not match the
/// batch, count every heartbeat as accepted.
pub fn partition_accepted(sent: &[Heartbeat], body: &str) -> Partition {
    let keys: Vec<IdentityKey> = sent.iter().map(Heartbeat::key).collect();

    let statuses = match parse_bulk_statuses(body) {
        Some(statuses) if statuses.len() == keys.len() => statuses,
        Some(statuses) => {
            tracing::warn!(
                sent = keys.len(),
                statuses = statuses.len(),
                "Bulk response item count mismatch; treating batch as accepted"
            );
            return Partition {
                accepted: keys,
                ..Partition::default()
            };
        }
        None => {
            return Partition {
                accepted: keys,
                ..Partition::default()
            }
        }
    };

    let mut partition = Partition::default();
    for (key, status) in keys.into_iter().zip(statuses) {
        let outcome = classify_status(status);
        if outcome == ErrorOutcome::Success {
            partition.accepted.push(key);
        } else if outcome.is_retryable() {
            partition.retained.push(key);
        } else {
            tracing::warn!(
                entity = %key.entity,
                time = key.time,
                status,
                "Heartbeat rejected by API; dropping"
            );
            partition.rejected.push(key);
        }
    }
    partition
}
