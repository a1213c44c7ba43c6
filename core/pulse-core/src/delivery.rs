//! One delivery cycle: resolve, gate, send, classify, commit.
//!
//! The orchestrator never fails. Every path ends in a [`DeliveryReport`]
//! carrying a deterministic exit code. Queue and backoff persistence problems
//! are logged and leave the classified exit code alone; the next invocation
//! sees whatever state did get committed.
//!
//! Delivery is at-least-once: records leave the queue only after the API
//! accepted them, so a crash between send and commit means a resend.

use std::path::Path;

use chrono::{DateTime, Utc};
use pulse_protocol::{EntityType, Heartbeat, IdentityKey, MAX_BATCH_SIZE};

use crate::api::{
    classify, exit_code, partition_accepted, AttemptResult, DeliveryError, ErrorOutcome,
    HeartbeatSender,
};
use crate::backoff::BackoffGate;
use crate::project::ProjectResolver;
use crate::queue::{OfflineQueue, QueueRecord};

/// What one invocation did, and how the process should exit.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    /// `None` when no request was made (backoff, or nothing to send).
    pub outcome: Option<ErrorOutcome>,
    pub exit_code: i32,
    /// Heartbeats included in the request.
    pub sent: usize,
    /// Heartbeats newly added to the offline queue.
    pub queued: usize,
    /// User-facing explanation for non-zero exits.
    pub message: Option<String>,
}

impl DeliveryReport {
    fn idle() -> Self {
        Self {
            outcome: None,
            exit_code: exit_code::SUCCESS,
            sent: 0,
            queued: 0,
            message: None,
        }
    }
}

pub struct Delivery<'a> {
    sender: &'a dyn HeartbeatSender,
    queue: &'a OfflineQueue,
    backoff: &'a BackoffGate,
    resolver: Option<&'a ProjectResolver>,
}

impl<'a> Delivery<'a> {
    pub fn new(
        sender: &'a dyn HeartbeatSender,
        queue: &'a OfflineQueue,
        backoff: &'a BackoffGate,
    ) -> Self {
        Self {
            sender,
            queue,
            backoff,
            resolver: None,
        }
    }

    /// Enables project resolution for file heartbeats.
    pub fn with_resolver(mut self, resolver: &'a ProjectResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Delivers `candidate` together with up to `MAX_BATCH_SIZE - 1` queued
    /// heartbeats.
    pub fn process(&self, mut candidate: Heartbeat, now: DateTime<Utc>) -> DeliveryReport {
        self.resolve_project(&mut candidate);
        self.deliver(Some(candidate), now)
    }

    /// Drains one batch of queued heartbeats with no new candidate.
    pub fn sync_offline(&self, now: DateTime<Utc>) -> DeliveryReport {
        self.deliver(None, now)
    }

    fn resolve_project(&self, candidate: &mut Heartbeat) {
        let Some(resolver) = self.resolver else {
            return;
        };
        if candidate.entity_type != EntityType::File
            || (candidate.project.is_some()
                && candidate.branch.is_some()
                && candidate.project_folder.is_some())
        {
            return;
        }

        match resolver.resolve(Path::new(&candidate.entity)) {
            Ok(Some(context)) => {
                if candidate.project.is_none() {
                    candidate.project = Some(context.project);
                }
                if candidate.branch.is_none() {
                    candidate.branch = context.branch;
                }
                if candidate.project_folder.is_none() {
                    candidate.project_folder = context
                        .folder
                        .map(|folder| folder.to_string_lossy().into_owned());
                }
            }
            Ok(None) => {
                tracing::debug!(entity = %candidate.entity, "No project context found");
            }
            Err(err) => {
                tracing::warn!(
                    entity = %candidate.entity,
                    error = %err,
                    "Project resolution failed; sending without project"
                );
            }
        }
    }

    fn deliver(&self, candidate: Option<Heartbeat>, now: DateTime<Utc>) -> DeliveryReport {
        let gate = self.backoff.check(now);
        if !gate.allowed {
            let queued = candidate
                .as_ref()
                .map(|hb| self.enqueue(std::slice::from_ref(hb), now))
                .unwrap_or(0);
            tracing::info!(
                remaining_secs = gate.remaining.as_secs(),
                queued,
                "Backoff in effect; skipping network"
            );
            return DeliveryReport {
                outcome: None,
                exit_code: exit_code::ERR_BACKOFF,
                sent: 0,
                queued,
                message: Some(
                    DeliveryError::Backoff(format!(
                        "backing off, next attempt in {}s",
                        gate.remaining.as_secs()
                    ))
                    .to_string(),
                ),
            };
        }

        let peek_limit = if candidate.is_some() {
            MAX_BATCH_SIZE - 1
        } else {
            MAX_BATCH_SIZE
        };
        let peeked = self.peek(peek_limit);
        let peeked_keys: Vec<IdentityKey> = peeked.iter().map(|r| r.heartbeat.key()).collect();

        let mut batch: Vec<Heartbeat> = peeked.into_iter().map(|r| r.heartbeat).collect();
        if let Some(hb) = &candidate {
            if !peeked_keys.contains(&hb.key()) {
                batch.push(hb.clone());
            }
        }

        if batch.is_empty() {
            tracing::debug!("Offline queue empty; nothing to send");
            return DeliveryReport::idle();
        }

        let attempt = self.sender.send(&batch);
        let outcome = classify(&attempt);
        tracing::info!(
            outcome = %outcome,
            sent = batch.len(),
            from_queue = peeked_keys.len(),
            "Delivery attempt classified"
        );

        let mut queued = 0;
        if outcome == ErrorOutcome::Success {
            let body = match &attempt {
                AttemptResult::Response(response) => response.body.as_str(),
                AttemptResult::Transport(_) => "",
            };
            let partition = partition_accepted(&batch, body);
            self.log_queue_err("remove", self.queue.commit_removal(&partition.removable()));

            if !partition.retained.is_empty() {
                if let Some(hb) = &candidate {
                    if partition.retained.contains(&hb.key()) {
                        queued = self.enqueue(std::slice::from_ref(hb), now);
                    }
                }
                self.log_queue_err("mark attempted", self.queue.mark_attempted(&partition.retained));
            }
            self.record(now, outcome, &attempt);
        } else if outcome.is_retryable() {
            if let Some(hb) = &candidate {
                queued = self.enqueue(std::slice::from_ref(hb), now);
            }
            self.log_queue_err("mark attempted", self.queue.mark_attempted(&peeked_keys));
            self.record(now, outcome, &attempt);
        } else {
            tracing::warn!(
                outcome = %outcome,
                detail = %attempt.describe(),
                "Delivery rejected; not retrying"
            );
        }

        DeliveryReport {
            outcome: Some(outcome),
            exit_code: outcome.exit_code(),
            sent: batch.len(),
            queued,
            message: DeliveryError::from_outcome(outcome, attempt.describe())
                .map(|err| err.to_string()),
        }
    }

    fn peek(&self, limit: usize) -> Vec<QueueRecord> {
        match self.queue.peek_batch(limit) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read offline queue; sending candidate only");
                Vec::new()
            }
        }
    }

    fn enqueue(&self, heartbeats: &[Heartbeat], now: DateTime<Utc>) -> usize {
        match self.queue.enqueue(heartbeats, now) {
            Ok(inserted) => inserted,
            Err(err) => {
                tracing::warn!(error = %err, count = heartbeats.len(), "Failed to queue heartbeats");
                0
            }
        }
    }

    fn record(&self, now: DateTime<Utc>, outcome: ErrorOutcome, attempt: &AttemptResult) {
        if let Err(err) = self
            .backoff
            .record_outcome(now, outcome, attempt.retry_after())
        {
            tracing::warn!(error = %err, outcome = %outcome, "Backoff update skipped");
        }
    }

    fn log_queue_err(&self, op: &str, result: Result<usize, crate::error::QueueError>) {
        if let Err(err) = result {
            tracing::warn!(op, error = %err, "Offline queue update failed");
        }
    }
}
