//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dispenser", version, about = "Liquid dispenser controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/dispenser.toml")]
    pub config: PathBuf,

    /// Optional steps-per-ml calibration CSV (headers: steps,ml)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines and print JSON errors
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins if set
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Use the simulated rig instead of GPIO/SPI/one-wire hardware
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop until Ctrl-C
    Run {
        /// Do not connect to the broker; sample and log locally only
        #[arg(long, action = ArgAction::SetTrue)]
        offline: bool,
    },
    /// Dispense once and print the status message
    Dispense {
        /// Volume in millilitres
        #[arg(long)]
        ml: f64,
        /// Draw liquid in instead of pushing it out
        #[arg(long, action = ArgAction::SetTrue)]
        pull: bool,
    },
    /// Take one sensor snapshot and report it
    SelfCheck,
    /// Turn the actuator by an angle (negative turns backward)
    Jog {
        #[arg(long, allow_hyphen_values = true)]
        degrees: f64,
    },
}
