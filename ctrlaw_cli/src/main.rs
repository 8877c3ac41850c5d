#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod logging;
mod run;
mod sink;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::{RunOptions, run_loop};

fn load(path: &Path) -> eyre::Result<ctrlaw_config::Loaded> {
    ctrlaw_config::load_config(path).wrap_err_with(|| format!("loading config {}", path.display()))
}

fn report(err: &eyre::Report) -> i32 {
    let code = exit_code_for_error(err);
    if code == 0 {
        // Cancelled by Ctrl-C: a normal end of an open-ended run.
        tracing::info!("run cancelled");
        return 0;
    }
    tracing::error!(error = %format!("{err:#}"), code, "ctrlaw failed");
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    code
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    match cli.cmd {
        Commands::Health => {
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok" }));
            } else {
                println!("ok");
            }
            Ok(())
        }
        Commands::Check => {
            let loaded = load(&cli.config)?;
            // Building the loop runs every cross-table check the core does.
            let plant = run::build_plant(&loaded)?;
            ctrlaw_core::builder_from_loaded(&loaded)?
                .with_provider(plant)
                .build()?;
            let t = &loaded.tables;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "ok",
                        "actuators": t.actuators().len(),
                        "readbacks": t.readbacks().len(),
                        "tests": t.tests.len(),
                        "compensation": t.compensation_matrix.is_some(),
                    })
                );
            } else {
                println!(
                    "config ok: {} actuators, {} readbacks, {} tests",
                    t.actuators().len(),
                    t.readbacks().len(),
                    t.tests.len()
                );
            }
            Ok(())
        }
        Commands::Run {
            steps,
            dry_run,
            gain,
            records,
        } => {
            let loaded = load(&cli.config)?;
            logging::init(&cli.log_level, cli.json, &loaded.config.logging, &loaded.base_dir)?;

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                .wrap_err("installing Ctrl-C handler")?;

            let opts = RunOptions {
                steps,
                dry_run,
                gain,
                records,
            };
            let summary = run_loop(&loaded, &opts, shutdown)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "finished",
                        "steps": summary.steps,
                        "skipped": summary.skipped,
                        "out_of_range": summary.out_of_range,
                        "glitches": summary.glitches,
                        "final_control": summary.final_control,
                    })
                );
            } else {
                println!(
                    "run complete: {} steps, {} skipped, {} out of range, {} glitches",
                    summary.steps, summary.skipped, summary.out_of_range, summary.glitches
                );
            }
            Ok(())
        }
    }
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    // `run` replaces this with the config-aware subscriber.
    if !matches!(cli.cmd, Commands::Run { .. }) {
        let _ = logging::init(
            &cli.log_level,
            cli.json,
            &ctrlaw_config::Logging::default(),
            Path::new("."),
        );
    }

    if let Err(e) = real_main(cli) {
        std::process::exit(report(&e));
    }
}
