//! Offline queue subcommands.

use chrono::Utc;
use pulse_core::config::DEFAULT_QUEUE_CAPACITY;
use pulse_core::{exit_code, Delivery, OfflineQueue, QueueRecord, StorageConfig};

use crate::{fail, ApiArgs, Pipeline};

/// `pulse offline-count`
pub fn count(storage: &StorageConfig) -> i32 {
    let result = open_queue(storage).and_then(|queue| {
        queue
            .count()
            .map_err(|err| fail("failed to count offline heartbeats", &err))
    });
    match result {
        Ok(count) => {
            println!("{count}");
            exit_code::SUCCESS
        }
        Err(code) => code,
    }
}

/// `pulse print-offline`
pub fn print(storage: &StorageConfig, limit: usize) -> i32 {
    let result = open_queue(storage).and_then(|queue| {
        queue
            .peek_batch(limit)
            .map_err(|err| fail("failed to read offline heartbeats", &err))
    });
    let records = match result {
        Ok(records) => records,
        Err(code) => return code,
    };

    for line in records.iter().filter_map(render) {
        println!("{line}");
    }
    exit_code::SUCCESS
}

/// `pulse sync-offline`
pub fn sync(api: &ApiArgs, storage: &StorageConfig) -> i32 {
    let pipeline = match Pipeline::open(storage, api) {
        Ok(pipeline) => pipeline,
        Err(code) => return code,
    };

    let report = Delivery::new(&pipeline.client, &pipeline.queue, &pipeline.backoff)
        .sync_offline(Utc::now());
    tracing::info!(sent = report.sent, exit_code = report.exit_code, "Offline sync finished");

    if let Some(message) = &report.message {
        eprintln!("{message}");
    }
    report.exit_code
}

// Read-only commands: capacity only matters on enqueue, so the default is fine.
fn open_queue(storage: &StorageConfig) -> Result<OfflineQueue, i32> {
    OfflineQueue::open(storage.offline_queue_file(), DEFAULT_QUEUE_CAPACITY)
        .map_err(|err| fail("offline queue unavailable", &err))
}

fn render(record: &QueueRecord) -> Option<String> {
    match serde_json::to_string(&record.heartbeat) {
        Ok(line) => Some(line),
        Err(err) => {
            tracing::warn!(error = %err, entity = %record.heartbeat.entity, "Failed to render heartbeat");
            None
        }
    }
}
