use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Standard copy deployment engine.
#[derive(Parser)]
#[command(name = "copyflow", version, about, long_about = None)]
pub struct Cli {
    /// Handler config (JSON or YAML): object store mirror, log level.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for deployment parameter documents.
    Schema,
    /// Validate, preview, or run a standard copy deployment.
    Deploy(DeployArgs),
    /// Start, stop, restart, create, delete or query one service, app pool
    /// or scheduled task.
    Service(ServiceArgs),
}

#[derive(Args)]
pub struct DeployArgs {
    /// Path to the parameter document (JSON, or YAML by extension).
    #[arg(long, required = true)]
    pub spec: PathBuf,

    /// Narrate every step without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Only validate the parameter document, do not deploy.
    #[arg(long)]
    pub validate_only: bool,

    /// Output progress events as JSON lines on stdout.
    #[arg(long)]
    pub json: bool,

    /// Append progress events to this NDJSON file.
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Correlation id stamped on every event (random by default).
    #[arg(long)]
    pub instance_id: Option<Uuid>,
}

#[derive(Args)]
pub struct ServiceArgs {
    /// Path to the service task document.
    #[arg(long, required = true)]
    pub task: PathBuf,

    /// Query only.
    #[arg(long)]
    pub dry_run: bool,

    /// Output progress events as JSON lines on stdout.
    #[arg(long)]
    pub json: bool,
}
