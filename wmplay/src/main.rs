#![deny(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wmplay::config::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let report = wmplay::app::run(&cli)?;
    tracing::info!(
        "session over: {} episodes, {} steps, {} inference failures",
        report.episodes,
        report.steps,
        report.inference_failures
    );
    Ok(())
}
