//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ctrlaw", version, about = "Closed-loop setpoint correction")]
pub struct Cli {
    /// Path to the loop config TOML; tables resolve relative to it
    #[arg(long, value_name = "FILE", default_value = "etc/ctrlaw.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results and errors as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the correction loop against the simulated plant in [plant]
    Run {
        /// Override [loop].steps (0 runs until Ctrl-C)
        #[arg(long, value_name = "N")]
        steps: Option<u64>,
        /// Compute and record corrections without writing setpoints
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Override [loop].gain
        #[arg(long, value_name = "GAIN", allow_hyphen_values = true)]
        gain: Option<f64>,
        /// Write per-iteration records, statistics and glitch dumps as JSON lines
        #[arg(long, value_name = "FILE")]
        records: Option<PathBuf>,
    },
    /// Load and cross-check the config and its tables, then exit
    Check,
    /// Health check for operational monitoring
    Health,
}
