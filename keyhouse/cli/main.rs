//! Operator console for the keyhouse vault.
//!
//! Every subcommand bootstraps against the state document at `--store-path`
//! and prints its result as JSON on stdout; logs go to stderr and the log
//! dir. Each invocation is its own process, so the store is always on disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keyhouse_engine::bootstrap::bootstrap;
use keyhouse_engine::config::{KeyhouseConfig, LoggingConfig, StoreConfig};
use keyhouse_engine::logging::init_logging;
use keyhouse_engine::store::StoreBackend;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "keyhouse", version, about = "Quorum-gated vault operator console")]
struct Cli {
    #[arg(long, env = "KEYHOUSE_LOG_LEVEL", default_value = "info", help = "Log level: debug | info | warn | error")]
    log_level: String,

    #[arg(long, env = "KEYHOUSE_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long, env = "KEYHOUSE_LOG_JSON", help = "Write the log file as JSON")]
    log_json: bool,

    #[arg(long, env = "KEYHOUSE_STORE_PATH", default_value = "keyhouse-state.json")]
    store_path: PathBuf,

    #[arg(long, env = "KEYHOUSE_CONNECT_RETRIES", default_value_t = 5)]
    connect_retries: u32,

    #[arg(long, env = "KEYHOUSE_CONNECT_BACKOFF_MS", default_value_t = 2000)]
    connect_backoff_ms: u64,

    #[arg(long, env = "KEYHOUSE_AUDIT_CAPACITY", default_value_t = 500)]
    audit_capacity: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vault state and activation progress
    Status,
    /// Generate key shares for a sealed vault, or report unlock progress
    Init,
    /// Activate one key share
    Activate {
        #[arg(help = "Key share id handed to this keyholder")]
        share_id: String,
    },
    /// Print the init code of a sealed vault
    InitCode,
    /// Connect to the store and run the startup checks only
    Check,
}

#[derive(Serialize)]
struct InitCodeOutput {
    init_code: String,
}

impl Cli {
    fn config(&self) -> KeyhouseConfig {
        KeyhouseConfig {
            log: LoggingConfig {
                level: self.log_level.clone(),
                dir: self.log_dir.clone(),
                json: self.log_json,
            },
            store: StoreConfig {
                backend: StoreBackend::File {
                    path: self.store_path.clone(),
                },
                connect_retries: self.connect_retries,
                connect_backoff: Duration::from_millis(self.connect_backoff_ms),
            },
            audit_capacity: self.audit_capacity,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config();
    config.validate().context("invalid configuration")?;

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&config.log).context("failed to initialize logging")?;
    tracing::info!(component = "cli", store = %config.store.backend.describe(), "keyhouse starting");

    let keyhouse = bootstrap(&config)
        .await
        .context("failed to bootstrap keyhouse")?;

    match cli.command {
        Commands::Status | Commands::Check => print_json(&keyhouse.status().await?)?,
        Commands::Init => print_json(&keyhouse.initialize().await?)?,
        Commands::Activate { share_id } => {
            let report = keyhouse
                .activate(&share_id)
                .await
                .context("failed to activate key")?;
            print_json(&report)?
        }
        Commands::InitCode => print_json(&InitCodeOutput {
            init_code: keyhouse.request_init_code().await?,
        })?,
    }
    Ok(())
}
