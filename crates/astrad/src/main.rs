//! AstraGuard daemon - anomaly detection and phase-aware recovery
//!
//! Loads the guard configuration, wires detection and decision components
//! together and drives telemetry frames through them.

mod cli;
mod commands;

use anyhow::{Context, Result};
use astra_common::AstraConfig;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AstraConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    astrad::logging::init(&config.logging.level)?;

    match cli.command {
        Commands::Run {
            frames,
            phase,
            phase_file,
            metrics,
        } => commands::run(&config, &frames, phase, phase_file, metrics).await,
        Commands::Check => commands::check(&config, &cli.config),
        Commands::Schedule { policy } => commands::schedule(&config, &policy),
    }
}
