use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::{DeployArgs, ServiceArgs};
use crate::config::HandlerConfig;
use crate::exit_codes::{self, exit};
use crate::journal::EventJournal;
use crate::model;
use crate::reporter::{OutputMode, Reporter};
use crate::service::{self, ServiceTaskRunner};
use crate::workflow::{RunOptions, Workflow};

fn output_mode(json: bool) -> OutputMode {
    if json {
        OutputMode::Json
    } else {
        OutputMode::Human
    }
}

pub fn deploy(args: DeployArgs, config: &HandlerConfig) -> Result<i32> {
    let spec = model::load_spec(&args.spec).context("failed to load parameter document")?;

    let mut reporter = Reporter::new(output_mode(args.json));
    if let Some(path) = &args.events {
        let journal = EventJournal::open(path)
            .with_context(|| format!("failed to open event journal {}", path.display()))?;
        reporter = reporter.with_journal(journal);
    }
    let reporter = Arc::new(reporter);

    let mut workflow = Workflow::new(reporter.clone());
    if let Some(client) = config.object_client() {
        workflow = workflow.with_object_client(client);
    }

    let options = RunOptions {
        dry_run: args.dry_run,
        instance_id: args.instance_id.unwrap_or_else(uuid::Uuid::new_v4),
    };

    if args.validate_only {
        let report = workflow.validate(&spec, options.instance_id);
        tracing::info!(valid = report.is_valid(), "validation finished");
        return Ok(if report.is_valid() {
            exit::SUCCESS
        } else {
            exit::FAILURE
        });
    }

    let outcome = workflow.execute(&spec, options);
    tracing::info!("{}", reporter.summary());
    if let Some(error) = &outcome.error {
        eprintln!("error: {}", crate::events::error_chain(error));
    }
    Ok(exit_codes::for_status(outcome.status))
}

pub fn service(args: ServiceArgs, config: &HandlerConfig) -> Result<i32> {
    let task = service::load_task(&args.task).context("failed to load service task")?;
    let reporter = Arc::new(Reporter::new(output_mode(args.json)));

    // No process controller is wired into the binary; embedders supply one.
    let runner = ServiceTaskRunner::new(
        reporter.clone(),
        Arc::new(crate::lifecycle::UnavailableController),
    )
    .with_restart_delay(config.restart_delay());
    let outcome = runner.run(
        &task,
        RunOptions {
            dry_run: args.dry_run,
            ..RunOptions::default()
        },
    );
    if let Some(error) = &outcome.error {
        eprintln!("error: {}", crate::events::error_chain(error));
    }
    Ok(exit_codes::for_status(outcome.status))
}

pub fn schema() -> Result<i32> {
    println!("{}", model::generate_schema()?);
    Ok(exit::SUCCESS)
}
