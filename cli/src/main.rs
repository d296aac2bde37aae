//! cloud-runtimes CLI - state store command line

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudrt_core::{ClientConfig, StateConsistency};
use cloudrt_state::{CallContext, SledTransport, StateClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "cloudrt")]
#[command(about = "cloud-runtimes state store CLI")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory of the local store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// State store name
    #[arg(short, long)]
    store: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one key
    Get {
        key: String,

        /// Read consistency (strong or eventual)
        #[arg(long)]
        consistency: Option<StateConsistency>,
    },

    /// Write one key
    Save {
        key: String,
        value: String,

        /// Only write if the current etag matches
        #[arg(long)]
        etag: Option<String>,

        /// Conditional write; without --etag the key must not exist
        #[arg(long)]
        first_write: bool,
    },

    /// Delete one key
    Delete {
        key: String,

        /// Only delete if the current etag matches
        #[arg(long)]
        etag: Option<String>,
    },

    /// Read several keys concurrently
    BulkGet {
        #[arg(required = true)]
        keys: Vec<String>,

        /// Concurrent reads
        #[arg(short, long, default_value = "4")]
        parallelism: i32,
    },

    /// Apply a JSON list of operations atomically
    Transact {
        /// Operations file
        ops: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.state.data_dir = data_dir.clone();
    }
    if let Some(store) = &cli.store {
        config.state.default_store = store.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Initialize logging; stdout carries the JSON output
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let store = config.state.default_store.clone();
    let transport = SledTransport::open(&config.state.data_dir)
        .with_context(|| format!("failed to open {}", config.state.data_dir.display()))?
        .with_store(&store)?;
    debug!(store = %store, data_dir = %config.state.data_dir.display(), "State store ready");

    let client = StateClient::with_config(Arc::new(transport), &config.state)
        .with_request_timeout(config.sidecar.request_timeout());
    let ctx = CallContext::background();

    match cli.command {
        Commands::Get { key, consistency } => {
            let view = commands::get(&client, &ctx, &store, &key, consistency).await?;
            commands::print_json(&view)?;
        }

        Commands::Save {
            key,
            value,
            etag,
            first_write,
        } => {
            let view = commands::save(&client, &ctx, &store, &key, value, etag, first_write).await?;
            commands::print_json(&view)?;
        }

        Commands::Delete { key, etag } => {
            let view = commands::delete(&client, &ctx, &store, &key, etag).await?;
            commands::print_json(&view)?;
        }

        Commands::BulkGet { keys, parallelism } => {
            let views = commands::bulk_get(&client, &ctx, &store, &keys, parallelism).await?;
            commands::print_json(&views)?;
        }

        Commands::Transact { ops } => {
            let view = commands::transact(&client, &ctx, &store, &ops).await?;
            commands::print_json(&view)?;
        }
    }

    Ok(())
}
