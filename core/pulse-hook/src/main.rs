//! pulse: command-line entry point for editor plugins.
//!
//! Plugins spawn one process per activity event and look only at the exit
//! code. Nothing here may panic or hang past the configured HTTP timeout.
//!
//! ## Subcommands
//!
//! - `heartbeat`: Send one heartbeat, plus queued ones when the API is reachable
//! - `offline-count`: Print how many heartbeats are waiting in the offline queue
//! - `sync-offline`: Deliver queued heartbeats without a new one
//! - `print-offline`: Dump queued heartbeats as JSON lines

mod heartbeat;
mod logging;
mod offline;

use clap::{Args, Parser, Subcommand};
use pulse_core::{
    exit_code, ApiClient, BackoffGate, ConfigError, ConfigOverrides, OfflineQueue, PulseConfig,
    StorageConfig,
};

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Coding activity agent for editor plugins")]
#[command(version)]
struct Cli {
    /// Log at debug level (also enabled by PULSE_DEBUG_LOG=1)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a heartbeat, together with any queued heartbeats
    Heartbeat(heartbeat::HeartbeatArgs),

    /// Print the number of heartbeats waiting in the offline queue
    OfflineCount,

    /// Deliver queued heartbeats without sending a new one
    SyncOffline(ApiArgs),

    /// Print queued heartbeats as JSON lines
    PrintOffline {
        /// Maximum number of heartbeats to print
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Connection settings shared by commands that talk to the API.
#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// Editor and plugin identifier appended to the User-Agent
    #[arg(long)]
    pub plugin: Option<String>,

    /// API key (overrides config file and PULSE_API_KEY)
    #[arg(long)]
    pub key: Option<String>,

    /// API base URL (overrides config file and PULSE_API_URL)
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ApiArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.key.clone(),
            api_url: self.api_url.clone(),
            timeout_secs: self.timeout,
        }
    }
}

/// Everything a delivery needs, opened fresh for this invocation.
pub struct Pipeline {
    pub queue: OfflineQueue,
    pub backoff: BackoffGate,
    pub client: ApiClient,
}

impl Pipeline {
    /// Opens the pipeline or returns the exit code explaining why it could not.
    pub fn open(storage: &StorageConfig, api: &ApiArgs) -> Result<Self, i32> {
        let config = load_config(storage, api)?;

        let queue = OfflineQueue::open(storage.offline_queue_file(), config.queue_capacity)
            .map_err(|err| fail("offline queue unavailable", &err))?;
        let client = ApiClient::new(&config, api.plugin.as_deref())
            .map_err(|err| fail("HTTP client unavailable", &err))?;

        tracing::debug!(
            api_url = %config.api_url,
            timeout_secs = config.timeout_secs,
            has_key = config.api_key.is_some(),
            "Pipeline opened"
        );

        Ok(Self {
            backoff: BackoffGate::new(storage),
            queue,
            client,
        })
    }
}

fn load_config(storage: &StorageConfig, api: &ApiArgs) -> Result<PulseConfig, i32> {
    let mut config = PulseConfig::load(storage).map_err(config_failure)?;
    config
        .apply_overrides(&api.overrides())
        .map_err(config_failure)?;
    Ok(config)
}

fn config_failure(err: ConfigError) -> i32 {
    tracing::error!(error = %err, "Configuration rejected");
    eprintln!("{err}");
    match err {
        ConfigError::NoHomeDir => exit_code::ERR_GENERIC,
        _ => exit_code::ERR_CONFIG_PARSE,
    }
}

fn fail(context: &str, err: &dyn std::error::Error) -> i32 {
    tracing::error!(error = %err, "{context}");
    eprintln!("{context}: {err}");
    exit_code::ERR_GENERIC
}

fn run(command: Commands, storage: &StorageConfig) -> i32 {
    match command {
        Commands::Heartbeat(args) => heartbeat::run(args, storage),
        Commands::OfflineCount => offline::count(storage),
        Commands::SyncOffline(api) => offline::sync(&api, storage),
        Commands::PrintOffline { limit } => offline::print(storage, limit),
    }
}

fn main() {
    let cli = Cli::parse();

    let (code, logging_guard) = match StorageConfig::from_env() {
        Ok(storage) => {
            let guard = logging::init(&storage, cli.verbose);
            (run(cli.command, &storage), guard)
        }
        Err(err) => {
            eprintln!("{err}");
            (exit_code::ERR_GENERIC, None)
        }
    };

    tracing::debug!(exit_code = code, "pulse exiting");
    // process::exit skips destructors; flush buffered log lines first.
    drop(logging_guard);
    std::process::exit(code);
}
