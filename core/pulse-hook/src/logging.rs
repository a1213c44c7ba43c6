//! File-only tracing setup.
//!
//! stdout and stderr belong to the editor that spawned us, so logs go to
//! `<root>/pulse.log` and nowhere else.

use std::env;

use pulse_core::StorageConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "PULSE_LOG";
const DEBUG_LOG_ENV: &str = "PULSE_DEBUG_LOG";

/// Installs the global subscriber. Returns `None` (logging disabled) when the
/// log directory cannot be created; the guard must outlive every log call.
pub fn init(storage: &StorageConfig, verbose: bool) -> Option<WorkerGuard> {
    let log_file = storage.log_file();
    let dir = log_file.parent()?;
    let file_name = log_file.file_name()?;
    std::fs::create_dir_all(dir).ok()?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn filter(verbose: bool) -> EnvFilter {
    let debug_enabled = verbose
        || env::var(DEBUG_LOG_ENV)
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);
    if debug_enabled {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}
