// ABOUTME: Entry point for the pvelab CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::StepWindow;
use pvelab::config::{self, LabConfig};
use pvelab::error::Result;
use pvelab::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    if let Err(e) = run(cli, mode).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<LabConfig> {
    let lab = match &cli.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::discover(&env::current_dir()?)?,
    };
    lab.validate()?;
    Ok(lab)
}

async fn run(cli: Cli, mode: OutputMode) -> Result<()> {
    let output = Output::new(mode);
    match &cli.command {
        Commands::Init { name, host, force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, name.as_deref(), host.as_deref(), *force)?;
            output.success(&format!("Wrote {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Deploy {
            start_step,
            end_step,
            force,
        } => {
            let lab = load_config(&cli)?;
            let window = StepWindow {
                start: *start_step,
                end: *end_step,
            };
            commands::deploy(lab, window, *force, output).await
        }
        Commands::Cleanup => commands::cleanup(load_config(&cli)?, output).await,
        Commands::Status => commands::status(load_config(&cli)?, output).await,
    }
}
