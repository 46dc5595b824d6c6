//! Single-target lifecycle workflow: start, stop, restart, create, delete or
//! query one service, application pool or scheduled task.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::events::{EventSink, Progress, Status, banner, elapsed};
use crate::lifecycle::{
    AppPoolStatus, ControllerError, CreateServiceRequest, PoolStop, ProcessController,
    ServiceStatus, StartMode, TaskStatus,
};
use crate::workflow::RunOptions;

const POOL_TIMEOUT: Duration = Duration::from_secs(10);

const POOL_STOP: PoolStop = PoolStop {
    timeout: POOL_TIMEOUT,
    retries: 3,
    retry_wait: POOL_TIMEOUT,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    #[default]
    Service,
    AppPool,
    ScheduledTask,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Create,
    Delete,
    #[default]
    Query,
    /// Report the start mode; same as `Query`.
    StartMode,
}

/// Parameter document of the lifecycle workflow.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServiceTask {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub target_name: String,
    #[serde(default)]
    pub target_type: TargetType,
    #[serde(default)]
    pub action: ServiceAction,
    /// Binary path, for `create`.
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub target_user_name: Option<String>,
    #[serde(default, deserialize_with = "secret")]
    #[schemars(with = "Option<String>")]
    pub target_password: Option<SecretString>,
    #[serde(default = "default_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default)]
    pub start_mode_on_start: StartMode,
    #[serde(default)]
    pub start_mode_on_stop: StartMode,
    #[serde(default)]
    pub service_parameters: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl ServiceTask {
    pub fn is_valid(&self) -> bool {
        !self.server_name.trim().is_empty() && !self.target_name.trim().is_empty()
    }
}

/// Last known state of the managed target.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessState {
    Service(ServiceStatus),
    AppPool(AppPoolStatus),
    ScheduledTask(TaskStatus),
}

impl ProcessState {
    pub fn state(&self) -> &str {
        match self {
            ProcessState::Service(status) => &status.state,
            ProcessState::AppPool(status) => &status.state,
            ProcessState::ScheduledTask(status) => &status.state,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Service(status) => status.fmt(f),
            ProcessState::AppPool(status) => status.fmt(f),
            ProcessState::ScheduledTask(status) => status.fmt(f),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("could not validate parameters: server_name and target_name are required")]
    InvalidParameters,

    #[error("{action} failed for {target} on {server}")]
    Controller {
        action: &'static str,
        target: String,
        server: String,
        #[source]
        source: ControllerError,
    },
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub status: Status,
    pub state: Option<ProcessState>,
    pub error: Option<TaskError>,
    pub elapsed: Duration,
    pub events_emitted: u64,
}

pub struct ServiceTaskRunner {
    sink: Arc<dyn EventSink>,
    controller: Arc<dyn ProcessController>,
    restart_delay: Duration,
}

impl ServiceTaskRunner {
    pub fn new(sink: Arc<dyn EventSink>, controller: Arc<dyn ProcessController>) -> Self {
        Self {
            sink,
            controller,
            restart_delay: Duration::from_secs(5),
        }
    }

    /// Pause between the stop and the start of a restart.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn run(&self, task: &ServiceTask, options: RunOptions) -> TaskOutcome {
        let context = "ExecuteAction";
        let clock = Instant::now();
        let progress = Progress::new(self.sink.clone(), options.instance_id);

        if progress.step_starting(context, &banner("Entering Main Workflow.")) {
            progress.finish(context, "Cancelled before start.", Status::Cancelled, None);
            return TaskOutcome {
                status: Status::Cancelled,
                state: None,
                error: None,
                elapsed: clock.elapsed(),
                events_emitted: progress.emitted(),
            };
        }
        progress.step_progress(
            context,
            &format!(
                "server_name={}, target_name={}, target_type={:?}, action={:?}",
                task.server_name, task.target_name, task.target_type, task.action
            ),
        );

        progress.step_progress("ValidateParameters", &banner("Begin [PrepareAndValidate]"));
        let valid = task.is_valid();
        progress.step_progress("ValidateParameters", &format!("IsValid = {valid}"));
        progress.step_progress("ValidateParameters", &banner("End [PrepareAndValidate]"));

        let result = if valid {
            let managed = Managed {
                task,
                controller: self.controller.as_ref(),
                progress: &progress,
                restart_delay: self.restart_delay,
            };
            match task.target_type {
                TargetType::Service => managed.service(options.dry_run),
                TargetType::AppPool => managed.app_pool(options.dry_run),
                TargetType::ScheduledTask => managed.scheduled_task(options.dry_run),
            }
        } else {
            Err(TaskError::InvalidParameters)
        };

        let (state, error) = match result {
            Ok(state) => (Some(state), None),
            Err(e) => (None, Some(e)),
        };
        if let Some(state) = &state {
            progress.step_progress(context, &state.to_string());
        }
        let status = if error.is_none() {
            Status::Complete
        } else {
            Status::Failed
        };
        let message = state.as_ref().map_or("Unknown", ProcessState::state);
        match &error {
            Some(e) => {
                tracing::error!(error = %crate::events::error_chain(e), "service task failed");
                progress.finish(context, message, status, Some(e as &(dyn std::error::Error + 'static)));
            }
            None => progress.finish(context, message, status, None),
        }
        tracing::info!(?status, elapsed = %elapsed(clock), "service task finished");

        TaskOutcome {
            status,
            state,
            error,
            elapsed: clock.elapsed(),
            events_emitted: progress.emitted(),
        }
    }
}

struct Managed<'a> {
    task: &'a ServiceTask,
    controller: &'a dyn ProcessController,
    progress: &'a Progress,
    restart_delay: Duration,
}

impl Managed<'_> {
    fn action(&self, context: &str, kind: &str, dry_run: bool) -> ServiceAction {
        self.progress
            .step_progress(context, &format!("Calling {kind} Action :[{:?}]", self.task.action));
        if dry_run {
            self.progress.step_progress(
                context,
                &format!("IsDryRun Flag Is Set.  {kind} Action Will Be Query Only."),
            );
            return ServiceAction::Query;
        }
        self.task.action
    }

    fn control<T>(
        &self,
        action: &'static str,
        call: impl FnOnce(&dyn ProcessController) -> crate::lifecycle::Result<T>,
    ) -> Result<T, TaskError> {
        call(self.controller).map_err(|source| TaskError::Controller {
            action,
            target: self.task.target_name.clone(),
            server: self.task.server_name.clone(),
            source,
        })
    }

    fn service(&self, dry_run: bool) -> Result<ProcessState, TaskError> {
        let task = self.task;
        let (name, server) = (task.target_name.as_str(), task.server_name.as_str());
        let stop_timeout = Duration::from_millis(task.stop_timeout_ms);
        let start_timeout = Duration::from_millis(task.start_timeout_ms);
        let stop = || {
            self.control("stop service", |c| {
                c.stop_service(name, server, stop_timeout, task.start_mode_on_stop)
            })
        };
        let start = || {
            self.control("start service", |c| {
                c.start_service(name, server, start_timeout, task.start_mode_on_start)
            })
        };

        match self.action("ManageService", "Service", dry_run) {
            ServiceAction::Query | ServiceAction::StartMode => {}
            ServiceAction::Start => start()?,
            ServiceAction::Stop => stop()?,
            ServiceAction::Restart => {
                stop()?;
                std::thread::sleep(self.restart_delay);
                start()?;
            }
            ServiceAction::Create => {
                let code = self.control("create service", |c| {
                    c.create_service(CreateServiceRequest {
                        name,
                        server,
                        display_name: name,
                        path: task.target_path.as_deref().unwrap_or_default(),
                        start_mode: task.start_mode_on_start,
                        user_name: task.target_user_name.as_deref(),
                        password: task
                            .target_password
                            .as_ref()
                            .map(|p| SecretString::from(p.expose_secret().to_string())),
                        parameters: task.service_parameters.as_deref(),
                    })
                })?;
                self.progress
                    .step_progress("ManageService", &format!("Create result: {code}"));
            }
            ServiceAction::Delete => {
                stop()?;
                let code = self.control("delete service", |c| c.delete_service(name, server))?;
                self.progress
                    .step_progress("ManageService", &format!("Delete result: {code}"));
            }
        }

        self.control("query service", |c| c.query_service(name, server))
            .map(ProcessState::Service)
    }

    fn app_pool(&self, dry_run: bool) -> Result<ProcessState, TaskError> {
        let (name, server) = (self.task.target_name.as_str(), self.task.server_name.as_str());
        match self.action("ManageAppPool", "AppPool", dry_run) {
            ServiceAction::Start => {
                self.control("start app pool", |c| c.start_app_pool(name, server, POOL_TIMEOUT))?
            }
            ServiceAction::Stop => {
                self.control("stop app pool", |c| c.stop_app_pool(name, server, POOL_STOP))?
            }
            ServiceAction::Restart => self.control("recycle app pool", |c| {
                c.recycle_app_pool(name, server, POOL_TIMEOUT)
            })?,
            _ => {}
        }
        self.control("query app pool", |c| c.query_app_pool(name, server))
            .map(ProcessState::AppPool)
    }

    fn scheduled_task(&self, dry_run: bool) -> Result<ProcessState, TaskError> {
        let (name, server) = (self.task.target_name.as_str(), self.task.server_name.as_str());
        let stop = || self.control("stop scheduled task", |c| c.stop_task(name, server));
        let start = || self.control("start scheduled task", |c| c.start_task(name, server));
        match self.action("ManageScheduledTask", "Scheduled Task", dry_run) {
            ServiceAction::Start => start()?,
            ServiceAction::Stop => stop()?,
            ServiceAction::Restart => {
                stop()?;
                std::thread::sleep(self.restart_delay);
                start()?;
            }
            _ => {}
        }
        self.control("query scheduled task", |c| c.query_task(name, server))
            .map(ProcessState::ScheduledTask)
    }
}

/// Load a service task document (JSON, or YAML by extension).
pub fn load_task(path: &std::path::Path) -> anyhow::Result<ServiceTask> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    let task = if is_yaml {
        serde_yaml::from_str(&text).map_err(anyhow::Error::from)
    } else {
        serde_json::from_str(&text).map_err(anyhow::Error::from)
    };
    task.with_context(|| format!("invalid service task {}", path.display()))
}
