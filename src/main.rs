use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use stackyard::errors::display_for_stack_error;
use stackyard::lifecycle::Orchestrator;
use stackyard::ConsoleConfig;

mod cli;
mod commands;
mod doctor;

use crate::cli::Cli;

fn load_config(cli: &Cli) -> anyhow::Result<ConsoleConfig> {
    let cfg = ConsoleConfig::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(
        data_dir = %cfg.data_dir.display(),
        template = %cfg.template_dir().display(),
        docker = %cfg.docker,
        "configuration loaded"
    );
    Ok(cfg)
}

fn main() -> ExitCode {
    // .env in the working directory feeds the same variables as the process environment
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    stackyard::logging::init_logging(cli.verbose);

    let cfg = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("stackyard: error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let orch = Orchestrator::from_config(cfg);
    match commands::run(&orch, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stackyard: error: {}", display_for_stack_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}
