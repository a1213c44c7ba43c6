//! # pulse-core
//!
//! Heartbeat delivery pipeline for the pulse editor agent.
//!
//! Editor plugins spawn one short-lived process per activity event. This
//! crate does the work of that process: fill in project context, decide
//! whether the network may be used right now, send the heartbeat together
//! with anything left over from earlier failures, and record what happened
//! so the next process can pick up where this one left off.
//!
//! ## Design Principles
//!
//! - **No memory across invocations**: backoff and the offline queue live on
//!   disk and are reloaded on every call.
//! - **Multi-process safe**: SQLite transactions guard the queue, an advisory
//!   lock plus rename commits guard backoff state.
//! - **Never crash the editor**: every failure becomes an exit code. Corrupt
//!   local state is treated as empty.
//! - **Synchronous**: no async runtime; the only blocking call is the bounded
//!   HTTP request.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pulse_core::{ApiClient, BackoffGate, Delivery, OfflineQueue, PulseConfig, StorageConfig};
//!
//! let storage = StorageConfig::from_env()?;
//! let config = PulseConfig::load(&storage)?;
//! let queue = OfflineQueue::open(storage.offline_queue_file(), config.queue_capacity)?;
//! let backoff = BackoffGate::new(&storage);
//! let client = ApiClient::new(&config, Some("vim-pulse/1.0"))?;
//!
//! let report = Delivery::new(&client, &queue, &backoff).process(heartbeat, chrono::Utc::now());
//! std::process::exit(report.exit_code);
//! ```

pub mod api;
pub mod backoff;
pub mod config;
pub mod delivery;
pub mod error;
pub mod lock;
pub mod osname;
pub mod project;
pub mod queue;
pub mod storage;

pub use api::{
    classify, exit_code, ApiClient, ApiResponse, AttemptResult, DeliveryError, ErrorOutcome,
    HeartbeatSender, TransportFailure,
};
pub use backoff::{BackoffCheck, BackoffGate, BackoffState};
pub use config::{ConfigOverrides, PulseConfig};
pub use delivery::{Delivery, DeliveryReport};
pub use error::{BackoffError, ConfigError, ProjectError, PulseError, QueueError, Result};
pub use project::{ProjectOverrides, ProjectResolver, ProjectResult};
pub use queue::{OfflineQueue, QueueRecord};
pub use storage::StorageConfig;

pub use pulse_protocol::{Category, EntityType, Heartbeat, IdentityKey};
