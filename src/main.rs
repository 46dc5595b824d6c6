//! `copyflow` - standard copy deployment engine.
//!
//! See `DESIGN.md` for architecture.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use copyflow::cli::{Cli, Command};
use copyflow::config::HandlerConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HandlerConfig::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_env("COPYFLOW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Command::Schema => copyflow::engine::schema()?,
        Command::Deploy(args) => copyflow::engine::deploy(args, &config)?,
        Command::Service(args) => copyflow::engine::service(args, &config)?,
    };
    std::process::exit(exit_code);
}
