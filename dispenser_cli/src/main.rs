mod cli;
mod commands;
mod error_fmt;
mod logging;
mod mqtt;
mod rig;

use clap::Parser;
use eyre::WrapErr;

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;

    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let cfg = dispenser_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", cli.config.display()))?;
    cfg.validate()?;

    let _log_guard = logging::init(cli.json, &cli.log_level, &cfg.logging)?;

    let calib = match cli.calibration.as_deref() {
        Some(path) => {
            let c = dispenser_config::load_calibration_csv(path)?;
            tracing::info!(steps_per_ml = c.steps_per_ml, path = %path.display(), "calibration loaded");
            Some(c)
        }
        None => None,
    };

    match cli.cmd {
        Commands::Run { offline } => {
            let stop = commands::install_stop_handler()?;
            commands::run(&cfg, calib.as_ref(), cli.sim, offline, &stop)?;
        }
        Commands::Dispense { ml, pull } => {
            let status = commands::dispense(&cfg, calib.as_ref(), cli.sim, ml, pull)?;
            println!("{status}");
        }
        Commands::SelfCheck => {
            let report = commands::self_check(&cfg, cli.sim, cli.json)?;
            println!("{report}");
        }
        Commands::Jog { degrees } => {
            let steps = commands::jog(&cfg, cli.sim, degrees)?;
            if cli.json {
                println!("{}", serde_json::json!({ "degrees": degrees, "steps": steps }));
            } else {
                println!("jogged {degrees} degrees ({steps} steps)");
            }
        }
    }
    Ok(())
}
