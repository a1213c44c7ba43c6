//! Cross-invocation delivery backoff.
//!
//! Each invocation is a fresh process, so the gate keeps nothing in memory:
//! every check loads `backoff.json` from disk, and every update is a locked
//! read-modify-write committed by rename. A missing, empty or corrupt file
//! means no backoff is in effect.
//!
//! Wait after `k` consecutive retryable failures is
//! `min(BASE_INTERVAL * 2^k, MAX_WAIT)`, with `k` capped at `MAX_FAILURES`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::api::ErrorOutcome;
use crate::error::BackoffError;
use crate::lock::FileLock;
use crate::storage::StorageConfig;

pub const BASE_INTERVAL: Duration = Duration::from_secs(15);
pub const MAX_FAILURES: u32 = 10;
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// How long an update waits for another process to release the state lock.
const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffState {
    pub next_allowed_at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            next_allowed_at: DateTime::<Utc>::UNIX_EPOCH,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCheck {
    pub allowed: bool,
    /// Time left until the next attempt is allowed; zero when allowed.
    pub remaining: Duration,
}

pub struct BackoffGate {
    path: PathBuf,
    lock_path: PathBuf,
}

impl BackoffGate {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            path: storage.backoff_file(),
            lock_path: storage.backoff_lock_file(),
        }
    }

    /// Current persisted state. Never fails: unreadable state is no backoff.
    pub fn state(&self) -> BackoffState {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return BackoffState::default()
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read backoff state; ignoring");
                return BackoffState::default();
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return BackoffState::default();
        }

        match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "Corrupt backoff state; treating as no backoff");
                BackoffState::default()
            }
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> BackoffCheck {
        let state = self.state();
        if now < state.next_allowed_at {
            let remaining = (state.next_allowed_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return BackoffCheck {
                allowed: false,
                remaining,
            };
        }
        BackoffCheck {
            allowed: true,
            remaining: Duration::ZERO,
        }
    }

    /// Folds one delivery outcome into the persisted state.
    ///
    /// Returns the new state, or `None` when the outcome does not touch
    /// backoff (nothing is written). `BackoffError::Contended` means another
    /// process held the lock past the timeout; the update is lost and the
    /// next invocation's outcome will be recorded instead.
    pub fn record_outcome(
        &self,
        now: DateTime<Utc>,
        outcome: ErrorOutcome,
        retry_after: Option<Duration>,
    ) -> Result<Option<BackoffState>, BackoffError> {
        if outcome != ErrorOutcome::Success && !outcome.escalates_backoff() {
            return Ok(None);
        }

        let _lock = FileLock::acquire_within(&self.lock_path, LOCK_TIMEOUT)
            .map_err(|source| BackoffError::Io {
                context: format!("locking {}", self.lock_path.display()),
                source,
            })?
            .ok_or(BackoffError::Contended)?;

        let current = self.state();
        let Some(next) = next_state(&current, now, outcome, retry_after) else {
            return Ok(None);
        };
        self.save(&next)?;

        if outcome == ErrorOutcome::Success {
            if current.consecutive_failures > 0 {
                tracing::info!(
                    previous_failures = current.consecutive_failures,
                    "Delivery recovered; backoff reset"
                );
            }
        } else {
            tracing::info!(
                failures = next.consecutive_failures,
                next_allowed_at = %next.next_allowed_at.to_rfc3339(),
                outcome = %outcome,
                "Backoff engaged"
            );
        }

        Ok(Some(next))
    }

    fn save(&self, state: &BackoffState) -> Result<(), BackoffError> {
        let io_err = |context: &str| {
            let context = format!("{context} {}", self.path.display());
            move |source: std::io::Error| BackoffError::Io { context, source }
        };

        let parent = self.path.parent().ok_or_else(|| BackoffError::Io {
            context: format!("{} has no parent directory", self.path.display()),
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;
        fs::create_dir_all(parent).map_err(io_err("creating directory for"))?;

        let payload = serde_json::to_vec_pretty(state)?;
        let mut temp_file = NamedTempFile::new_in(parent).map_err(io_err("staging"))?;
        temp_file.write_all(&payload).map_err(io_err("writing"))?;
        temp_file.flush().map_err(io_err("flushing"))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| err.error)
            .map_err(io_err("committing"))?;
        Ok(())
    }
}

/// Wait imposed after `failures` consecutive retryable failures.
pub fn compute_wait(failures: u32) -> Duration {
    let factor = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
    let secs = BASE_INTERVAL.as_secs().saturating_mul(factor);
    Duration::from_secs(secs).min(MAX_WAIT)
}

/// Pure transition function. `None` when the outcome leaves state unchanged.
pub fn next_state(
    current: &BackoffState,
    now: DateTime<Utc>,
    outcome: ErrorOutcome,
    retry_after: Option<Duration>,
) -> Option<BackoffState> {
    if outcome == ErrorOutcome::Success {
        return Some(BackoffState {
            next_allowed_at: now,
            consecutive_failures: 0,
        });
    }
    if !outcome.escalates_backoff() {
        return None;
    }

    let failures = current.consecutive_failures.saturating_add(1).min(MAX_FAILURES);
    let hinted = retry_after.map(|hint| hint.min(MAX_WAIT)).unwrap_or_default();
    let wait = compute_wait(failures).max(hinted);
    let candidate = ChronoDuration::from_std(wait)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now);

    Some(BackoffState {
        next_allowed_at: current.next_allowed_at.max(candidate),
        consecutive_failures: failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_769_774_400 + secs, 0).unwrap()
    }

    fn gate(temp: &tempfile::TempDir) -> BackoffGate {
        BackoffGate::new(&StorageConfig::with_root(temp.path().to_path_buf()))
    }

    #[test]
    fn test_wait_doubles_until_cap() {
        for k in 0..=MAX_FAILURES {
            let expected = Duration::from_secs(15 * 2u64.pow(k)).min(MAX_WAIT);
            assert_eq!(compute_wait(k), expected, "k={k}");
        }
        assert_eq!(compute_wait(64), MAX_WAIT);
    }

    #[test]
    fn test_failure_at_cap_keeps_wait_at_cap() {
        let mut state = BackoffState::default();
        let now = at(0);
        for _ in 0..MAX_FAILURES {
            state = next_state(&state, now, ErrorOutcome::ServerError, None).unwrap();
        }
        assert_eq!(state.consecutive_failures, MAX_FAILURES);

        let capped = next_state(&state, now, ErrorOutcome::ServerError, None).unwrap();
        assert_eq!(capped.consecutive_failures, MAX_FAILURES);
        assert_eq!(capped.next_allowed_at, state.next_allowed_at);
        assert_eq!(
            (capped.next_allowed_at - now).to_std().unwrap(),
            compute_wait(MAX_FAILURES)
        );
    }

    #[test]
    fn test_next_allowed_never_moves_backwards_on_failure() {
        let state = BackoffState {
            next_allowed_at: at(10_000),
            consecutive_failures: 1,
        };
        let next = next_state(&state, at(0), ErrorOutcome::TransientNetwork, None).unwrap();
        assert_eq!(next.next_allowed_at, at(10_000));
        assert_eq!(next.consecutive_failures, 2);
    }

    #[test]
    fn test_retry_after_extends_window() {
        let state = BackoffState::default();
        let next = next_state(
            &state,
            at(0),
            ErrorOutcome::RateLimited,
            Some(Duration::from_secs(600)),
        )
        .unwrap();
        assert_eq!(next.next_allowed_at, at(600));

        let short_hint =
            next_state(&state, at(0), ErrorOutcome::RateLimited, Some(Duration::from_secs(1)))
                .unwrap();
        assert_eq!(short_hint.next_allowed_at, at(30));
    }

    #[test]
    fn test_terminal_outcomes_leave_state_alone() {
        let state = BackoffState {
            next_allowed_at: at(50),
            consecutive_failures: 3,
        };
        assert_eq!(next_state(&state, at(0), ErrorOutcome::Unauthorized, None), None);
        assert_eq!(next_state(&state, at(0), ErrorOutcome::BadRequest, None), None);
    }

    #[test]
    fn test_check_blocks_until_window_passes() {
        let temp = tempdir().unwrap();
        let gate = gate(&temp);
        assert!(gate.check(at(0)).allowed);

        gate.record_outcome(at(0), ErrorOutcome::ServerError, None)
            .unwrap();

        let blocked = gate.check(at(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, Duration::from_secs(20));
        assert!(gate.check(at(30)).allowed);
    }

    #[test]
    fn test_success_resets_persisted_state() {
        let temp = tempdir().unwrap();
        let gate = gate(&temp);
        gate.record_outcome(at(0), ErrorOutcome::ServerError, None)
            .unwrap();
        gate.record_outcome(at(1), ErrorOutcome::ServerError, None)
            .unwrap();
        assert_eq!(gate.state().consecutive_failures, 2);

        gate.record_outcome(at(200), ErrorOutcome::Success, None)
            .unwrap();
        let state = gate.state();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.next_allowed_at, at(200));
        assert!(gate.check(at(200)).allowed);
    }

    #[test]
    fn test_unauthorized_writes_nothing() {
        let temp = tempdir().unwrap();
        let gate = gate(&temp);
        let result = gate
            .record_outcome(at(0), ErrorOutcome::Unauthorized, None)
            .unwrap();
        assert!(result.is_none());
        assert!(!temp.path().join("backoff.json").exists());
    }

    #[test]
    fn test_corrupt_or_empty_file_means_no_backoff() {
        let temp = tempdir().unwrap();
        let gate = gate(&temp);

        std::fs::write(temp.path().join("backoff.json"), "{\"next_allowed_at\": ").unwrap();
        assert!(gate.check(at(0)).allowed);
        assert_eq!(gate.state(), BackoffState::default());

        std::fs::write(temp.path().join("backoff.json"), "  \n").unwrap();
        assert!(gate.check(at(0)).allowed);

        // A torn file is overwritten cleanly by the next update.
        gate.record_outcome(at(0), ErrorOutcome::ServerError, None)
            .unwrap();
        assert_eq!(gate.state().consecutive_failures, 1);
    }

    #[test]
    fn test_contended_lock_skips_update() {
        let temp = tempdir().unwrap();
        let gate = gate(&temp);
        let _held = FileLock::try_acquire(&temp.path().join("backoff.json.lock"))
            .unwrap()
            .unwrap();

        let result = gate.record_outcome(at(0), ErrorOutcome::ServerError, None);
        assert!(matches!(result, Err(BackoffError::Contended)));
        assert_eq!(gate.state(), BackoffState::default());
    }
}
