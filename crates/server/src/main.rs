//! Cask maintenance binary.

use anyhow::{Context, Result};
use cask_server::bootstrap::{build_state, init_tracing, load_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use time::OffsetDateTime;

/// Cask - content-addressed node store
#[derive(Parser, Debug)]
#[command(name = "caskd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CASK_CONFIG", default_value = "config/cask.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the metadata schema.
    Migrate,
    /// Delete expired tokens, tickets, pending pairings and authorized keys.
    Purge,
    /// Load and validate configuration, then print it.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    tracing::info!("caskd v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(Some(&args.config))?;

    match args.command {
        Command::CheckConfig => {
            let rendered =
                serde_json::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{rendered}");
        }
        Command::Migrate => {
            let state = build_state(config).await?;
            state
                .metadata
                .migrate()
                .await
                .context("failed to apply schema")?;
            tracing::info!("schema up to date");
        }
        Command::Purge => {
            let state = build_state(config).await?;
            let stats = state
                .metadata
                .purge_expired(OffsetDateTime::now_utc())
                .await
                .context("failed to purge expired records")?;
            tracing::info!(
                tokens = stats.tokens,
                tickets = stats.tickets,
                pending_pairings = stats.pending_pairings,
                authorized_keys = stats.authorized_keys,
                "purged {} expired records",
                stats.total()
            );
        }
    }
    Ok(())
}
