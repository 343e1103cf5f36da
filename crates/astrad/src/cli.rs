//! Command-line interface

use astra_common::{MissionPhase, CONFIG_PATH};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "astrad")]
#[command(about = "AstraGuard - anomaly detection and phase-aware recovery", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run telemetry frames through detection and recovery decisions
    Run {
        /// JSON-lines file of telemetry frames
        #[arg(long)]
        frames: PathBuf,

        /// Fixed mission phase (LAUNCH, DEPLOYMENT, NOMINAL_OPS, PAYLOAD_OPS, SAFE_MODE)
        #[arg(long, conflicts_with = "phase_file")]
        phase: Option<MissionPhase>,

        /// File holding the current mission phase name
        #[arg(long)]
        phase_file: Option<PathBuf>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Validate the configuration file
    Check,

    /// Print the nominal backoff schedule of a retry policy
    Schedule {
        /// Retry policy name from the [retry] section
        policy: String,
    },
}
