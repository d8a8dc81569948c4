//! Maintenance CLI for the pkgcache download cache

mod cli;
mod commands;
mod logging;

use crate::cli::Cli;
use crate::logging::TracingConfig;
use clap::Parser;

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    logging::init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        ..Default::default()
    })?;

    commands::run(&cli)
}
