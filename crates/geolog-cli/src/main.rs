//! Geologger CLI - Offline-first location recording from the terminal
//!
//! Positions are sampled from a JSON-lines feed, queued locally, and
//! reconciled with the backend whenever it is reachable.

mod auth;
mod cli;
mod commands;
mod error;

use clap::Parser;
use geolog_core::config::ClientConfig;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::log::run_log;
use crate::commands::map::{run_map, MapOptions};
use crate::commands::stats::run_stats;
use crate::commands::sync::{run_pending, run_prune, run_requeue, run_sync};
use crate::commands::track::{run_track, TrackOptions};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "geolog=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::InvalidArgument(format!("Invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = ClientConfig::from_env()?;
    let db_path = resolve_db_path(cli.db_path)?;

    match cli.command {
        Commands::Track {
            input,
            once,
            min_interval_ms,
            min_distance_m,
        } => {
            let options = TrackOptions {
                input,
                once,
                min_interval_ms,
                min_distance_m,
            };
            run_track(options, &config, &db_path).await?;
        }
        Commands::Log { lat, lng, altitude } => {
            run_log(lat, lng, altitude, &config, &db_path).await?;
        }
        Commands::Sync => run_sync(&config, &db_path).await?,
        Commands::Pending { dead, json } => run_pending(dead, json, &config, &db_path).await?,
        Commands::Requeue => run_requeue(&config, &db_path).await?,
        Commands::Prune { older_than_days } => {
            run_prune(older_than_days, &config, &db_path).await?;
        }
        Commands::Stats { period, local } => {
            run_stats(period.into(), local, &config, &db_path).await?;
        }
        Commands::Map {
            provider,
            period,
            detail,
            local,
            output,
        } => {
            let options = MapOptions {
                provider: provider.map(Into::into),
                period: period.into(),
                detail,
                local,
                output,
            };
            run_map(options, &config, &db_path).await?;
        }
        Commands::Auth { command } => run_auth(command, &config).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests;
