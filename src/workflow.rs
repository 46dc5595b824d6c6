//! The standard copy workflow.
//!
//! Phases run in a fixed order: validate, back up what is currently
//! deployed, transform configs, copy to every target in parallel (stopping
//! and restarting services and app pools around each server copy), settle
//! the transformed configs at the source, and promote the source to the next
//! environment. A failing phase aborts the phases after it; sibling targets
//! inside a phase always run to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use rayon::prelude::*;
use uuid::Uuid;

use crate::credentials::{Decrypt, UnavailableDecryptor, decrypt_password};
use crate::error::{DeployError, Result, collect_all};
use crate::events::{EventSink, Progress, Status, banner, elapsed, padded};
use crate::lifecycle::{
    ControllerError, CreateServiceRequest, PoolStop, ProcessController, ServiceReturnCode,
    StartMode, UnavailableController,
};
use crate::model::{AppPoolDescriptor, DeploymentSpec, ServiceDescriptor, non_blank};
use crate::object_store::ObjectClient;
use crate::storage::{Location, Storage};
use crate::transform::{ConfigTransform, UnavailableTransform};
use crate::validate::{self, DeploymentPlan, TransformPair, ValidationReport};

const PADDING: usize = 50;

const POOL_STOP: PoolStop = PoolStop {
    timeout: Duration::from_secs(30),
    retries: 3,
    retry_wait: Duration::from_secs(30),
};
const POOL_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Deployment engine with its external collaborators wired in.
pub struct Workflow {
    sink: Arc<dyn EventSink>,
    object_client: Option<Arc<dyn ObjectClient>>,
    controller: Arc<dyn ProcessController>,
    transform: Arc<dyn ConfigTransform>,
    decryptor: Arc<dyn Decrypt>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub dry_run: bool,
    pub instance_id: Uuid,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            instance_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: Status,
    pub elapsed: Duration,
    pub error: Option<DeployError>,
    /// `None` when the run was cancelled before validation.
    pub validation: Option<ValidationReport>,
    pub events_emitted: u64,
}

impl Workflow {
    /// A workflow with no object storage, process control, transforms or
    /// decryption; plug them in with the `with_*` methods.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            object_client: None,
            controller: Arc::new(UnavailableController),
            transform: Arc::new(UnavailableTransform),
            decryptor: Arc::new(UnavailableDecryptor),
        }
    }

    pub fn with_object_client(mut self, client: Arc<dyn ObjectClient>) -> Self {
        self.object_client = Some(client);
        self
    }

    pub fn with_controller(mut self, controller: Arc<dyn ProcessController>) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn ConfigTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decrypt>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Validate `spec` and, if it is valid, deploy it. Never panics on
    /// deployment failures: they are reported in the outcome and in the
    /// terminal progress event.
    pub fn execute(&self, spec: &DeploymentSpec, options: RunOptions) -> RunOutcome {
        let context = "ExecuteAction";
        let clock = Instant::now();
        let progress = Arc::new(Progress::new(self.sink.clone(), options.instance_id));
        tracing::info!(instance_id = %options.instance_id, dry_run = options.dry_run, "starting deployment");

        let header = banner(&format!(
            "copyflow {}, Standard Copy Process. Entering Main Workflow.",
            env!("CARGO_PKG_VERSION")
        ));
        if progress.step_starting(context, &header) {
            progress.finish(context, "Cancelled before start.", Status::Cancelled, None);
            return RunOutcome {
                status: Status::Cancelled,
                elapsed: clock.elapsed(),
                error: None,
                validation: None,
                events_emitted: progress.emitted(),
            };
        }
        match serde_json::to_string(spec) {
            Ok(document) => progress.step_progress(context, &document),
            Err(e) => tracing::debug!(error = %e, "could not render parameter document"),
        }

        let run = Run {
            workflow: self,
            storage: Storage::new(self.object_client.clone(), options.dry_run, progress.clone()),
            progress: progress.clone(),
            manifest_exceptions: Mutex::new(Vec::new()),
        };

        let plan = run.validate(spec);
        let error = if plan.report.is_valid() {
            run.execute_phases(&plan).err()
        } else {
            Some(DeployError::Validation {
                failed: plan.report.failed_checks(),
            })
        };

        let ok = error.is_none();
        let manifest_exceptions = run.manifest_exception_count();
        let status = Status::for_run(
            ok,
            manifest_exceptions > 0,
            plan.delete_manifest.treat_exceptions_as_warnings,
        );
        let footer = banner(&format!(
            "End Main Workflow: {}, Total Execution Time: {}",
            if ok { "Complete." } else { "One or more steps failed." },
            elapsed(clock)
        ));
        match &error {
            Some(e) => {
                tracing::error!(error = %crate::events::error_chain(e), "deployment failed");
                progress.finish(context, &footer, status, Some(e as &(dyn std::error::Error + 'static)));
            }
            None => progress.finish(context, &footer, status, None),
        }
        tracing::info!(?status, manifest_exceptions, "deployment finished");

        RunOutcome {
            status,
            elapsed: clock.elapsed(),
            error,
            validation: Some(plan.report),
            events_emitted: progress.emitted(),
        }
    }

    /// Resolve and probe every location of `spec` and narrate the result,
    /// without running any phase.
    pub fn validate(&self, spec: &DeploymentSpec, instance_id: Uuid) -> ValidationReport {
        let progress = Arc::new(Progress::new(self.sink.clone(), instance_id));
        let run = Run {
            workflow: self,
            storage: Storage::new(self.object_client.clone(), true, progress.clone()),
            progress,
            manifest_exceptions: Mutex::new(Vec::new()),
        };
        run.validate(spec).report
    }
}

/// A transformed config waiting next to its original.
struct TransformOutput<'p> {
    pair: &'p TransformPair,
    /// File name of the output, shared by the source and every target.
    temp_name: String,
    temp: Location,
}

enum CopyTarget<'p> {
    Server(&'p str),
    Remote(&'p Location),
}

impl CopyTarget<'_> {
    fn label(&self) -> &str {
        match self {
            CopyTarget::Server(server) => *server,
            CopyTarget::Remote(_) => "Remote",
        }
    }
}

/// State of one invocation.
struct Run<'w> {
    workflow: &'w Workflow,
    storage: Storage,
    progress: Arc<Progress>,
    manifest_exceptions: Mutex<Vec<String>>,
}

impl Run<'_> {
    fn dry_run(&self) -> bool {
        self.storage.is_dry_run()
    }

    /// `base`, or `DryRun:base` under dry run, announcing the dry run once.
    fn context(&self, base: &'static str, dry_run_notice: &str) -> String {
        if self.dry_run() {
            let context = format!("DryRun:{base}");
            self.progress
                .step_progress(&context, &format!("DryRun Flag Is Set.  {dry_run_notice}"));
            context
        } else {
            base.to_string()
        }
    }

    fn manifest_exception_count(&self) -> usize {
        self.manifest_exceptions
            .lock()
            .map(|exceptions| exceptions.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    fn validate(&self, spec: &DeploymentSpec) -> DeploymentPlan {
        let context = "ExecuteAction";
        let say = |name: &str, value: String| {
            self.progress.step_progress(context, &padded(name, value, PADDING));
        };
        let show = |location: &Option<Location>| {
            location
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        };

        self.progress
            .step_progress(context, &banner("Begin [PrepareAndValidate]"));
        let plan = validate::validate(spec, &self.storage);
        let report = &plan.report;

        say("SourceDirectory", plan.source.to_string());
        say("IsSourceDirectoryValid", report.source_directory.to_string());
        if let (Some(next), Some(valid)) = (&plan.next_environment, report.next_environment_directory) {
            say("NextEnvironmentSourceDirectory", next.to_string());
            say("IsNextEnvironmentSourceDirectoryValid", valid.to_string());
        }
        say("TargetRemoteDestination", show(&plan.target_remote));
        say("IsTargetRemoteDestinationValid", report.target_remote_destination.to_string());
        say("BackupRemoteDestination", show(&plan.backup_remote));
        say("IsBackupRemoteDestinationValid", report.backup_remote_destination.to_string());
        say(
            "TargetServerDestination",
            plan.spec.target_server_destination.clone().unwrap_or_default(),
        );
        say("IsTargetServerPathValid", report.target_server_path.to_string());
        say("CreateTargetServerPath", report.create_target_server_path.to_string());
        say("BackupServerDestination", show(&plan.backup_server));
        say("IsBackupServerDestinationValid", report.backup_server_destination.to_string());
        if let Some(file) = &plan.delete_manifest.file {
            say("DeleteManifest", file.to_string());
            say("IsDeleteManifestPathValid", report.delete_manifest.to_string());
        }
        say("IsConfigTransformFileListValid", report.config_transform_file_list.to_string());
        if !report.config_transform_file_list {
            for pair in &plan.transforms {
                say(&format!("  Config File: {}", pair.name), pair.config_exists.to_string());
                say(
                    &format!("  Transform File: {}", pair.transform_file),
                    pair.transform_exists.to_string(),
                );
            }
        }
        let failed = report.failed_checks();
        let verdict = if failed.is_empty() {
            report.is_valid().to_string()
        } else {
            format!("{} [failed: {}]", report.is_valid(), failed.join(", "))
        };
        say("IsValid", verdict);
        self.progress
            .step_progress(context, &banner("End [PrepareAndValidate]"));
        plan
    }

    fn execute_phases(&self, plan: &DeploymentPlan) -> Result<()> {
        self.execute_backups(plan)?;
        let outputs = self.update_config_values(plan)?;
        self.execute_copy_content_tasks(plan, &outputs)?;
        self.update_config_originals(&outputs)?;
        if let Some(next) = &plan.next_environment {
            self.move_to_next_environment(plan, next)?;
        }
        Ok(())
    }

    fn execute_backups(&self, plan: &DeploymentPlan) -> Result<()> {
        let context = "ExecuteBackups";
        if self
            .progress
            .step_starting(context, &banner("Beginning content backup."))
        {
            return Ok(());
        }
        let clock = Instant::now();

        let mut roots: Vec<(Location, &Location)> = Vec::new();
        if let (Some(target), Some(backup)) = (&plan.target_remote, &plan.backup_remote)
            && plan.report.backup_remote_destination
        {
            self.progress
                .step_progress(context, "Backing-up remote destination.");
            roots.push((target.clone(), backup));
        }
        // Only the first server is backed up.
        if let (Some(backup), Some(first)) = (&plan.backup_server, plan.spec.servers.first())
            && plan.report.backup_server_destination
            && let Some(target) = plan.server_destination(first)
        {
            self.progress
                .step_progress(context, "Backing-up server destination.");
            roots.push((target, backup));
        }

        if !roots.is_empty() {
            let files = self.storage.list_files(&plan.source, true)?;
            let results = roots
                .par_iter()
                .map(|(target, backup)| {
                    self.backup_content(&files, &plan.source, target, backup)
                        .map_err(|e| {
                            self.progress.step_failed(
                                &format!("BackupContent failed on: [{target}]"),
                                &e,
                            );
                            DeployError::Target {
                                target: target.to_string(),
                                source: Box::new(e),
                            }
                        })
                })
                .collect();
            collect_all(results)?;
        }

        self.progress.step_finished(
            context,
            &banner(&format!(
                "End content backup, Total Execution Time: {}",
                elapsed(clock)
            )),
        );
        Ok(())
    }

    /// Copy to `backup` every file of the release that is currently deployed
    /// at `target`.
    fn backup_content(
        &self,
        files: &[Location],
        source: &Location,
        target: &Location,
        backup: &Location,
    ) -> Result<()> {
        for file in files {
            let Some(rel) = file.relative_to(source) else {
                continue;
            };
            let deployed = target.join(&rel);
            if !self.storage.exists(&deployed)? || self.storage.is_dir(&deployed)? {
                continue;
            }
            self.storage.copy_file(&deployed, &backup.join(&rel))?;
        }
        Ok(())
    }

    fn update_config_values<'p>(&self, plan: &'p DeploymentPlan) -> Result<Vec<TransformOutput<'p>>> {
        let context = "UpdateConfigValues";
        if self
            .progress
            .step_starting(context, &banner("Updating config files."))
        {
            return Ok(Vec::new());
        }
        let clock = Instant::now();

        let mut outputs = Vec::with_capacity(plan.transforms.len());
        for pair in &plan.transforms {
            let output = self.execute_transform(plan, pair).map_err(|e| {
                self.progress.step_failed(
                    &format!(
                        "ExecuteXmlTransformation failed on: configFile:[{}], transformFileName:[{}]",
                        pair.config, pair.transform_file
                    ),
                    &e,
                );
                e
            })?;
            outputs.push(output);
        }

        self.progress.step_finished(
            context,
            &banner(&format!(
                "End config files updates, Total Execution Time: {}",
                elapsed(clock)
            )),
        );
        Ok(outputs)
    }

    /// Write the transformed config next to the original, under a random name.
    fn execute_transform<'p>(
        &self,
        plan: &DeploymentPlan,
        pair: &'p TransformPair,
    ) -> Result<TransformOutput<'p>> {
        let temp_name = format!("{}.tmp", Uuid::new_v4().simple());
        let temp = pair
            .config
            .parent()
            .unwrap_or_else(|| plan.source.clone())
            .join(&temp_name);
        let message = format!(
            "Executing XmlTransformation on [{}] with [{}]",
            pair.name, pair.transform_file
        );

        if self.dry_run() {
            self.progress
                .step_progress("DryRun:ExecuteXmlTransformation", &message);
        } else {
            self.progress
                .step_progress("ExecuteXmlTransformation", &message);
            let document = self.storage.read_to_string(&pair.config)?;
            let transform = self.storage.read_to_string(&pair.transform)?;
            let transformed = self
                .workflow
                .transform
                .apply(&document, &transform)
                .map_err(|source| DeployError::Transform {
                    config: pair.config.to_string(),
                    transform: pair.transform.to_string(),
                    source,
                })?;
            self.storage.write_string(&temp, &transformed)?;
        }

        Ok(TransformOutput {
            pair,
            temp_name,
            temp,
        })
    }

    fn execute_copy_content_tasks(
        &self,
        plan: &DeploymentPlan,
        outputs: &[TransformOutput<'_>],
    ) -> Result<()> {
        let context = "ExecuteCopyContentTasks";
        if self
            .progress
            .step_starting(context, &banner("Copying content to destinations."))
        {
            return Ok(());
        }
        let clock = Instant::now();

        let mut targets: Vec<CopyTarget<'_>> = plan
            .spec
            .servers
            .iter()
            .map(|server| CopyTarget::Server(server.as_str()))
            .collect();
        if let Some(remote) = &plan.target_remote {
            targets.push(CopyTarget::Remote(remote));
        }

        let results = targets
            .par_iter()
            .map(|target| self.copy_content(plan, outputs, target))
            .collect();
        collect_all(results)?;

        self.progress.step_finished(
            context,
            &banner(&format!(
                "End content copy: Total Execution Time: {}",
                elapsed(clock)
            )),
        );
        Ok(())
    }

    fn copy_content(
        &self,
        plan: &DeploymentPlan,
        outputs: &[TransformOutput<'_>],
        target: &CopyTarget<'_>,
    ) -> Result<()> {
        let context = "CopyContent";
        let label = target.label();
        let clock = Instant::now();
        self.progress
            .step_progress(context, &format!("Beginning copy for [{label}]"));

        let copied = match target {
            CopyTarget::Server(server) => self.copy_to_server(plan, outputs, server),
            CopyTarget::Remote(destination) => self.copy_to_destination(plan, outputs, destination),
        };
        match copied {
            Ok(bytes) => {
                self.progress.step_progress(
                    context,
                    &format!(
                        "End copy for [{label}], Copied: {}, Time: {}",
                        ByteSize(bytes),
                        elapsed(clock)
                    ),
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(copy_target = label, error = %crate::events::error_chain(&e), "copy failed");
                self.progress
                    .step_failed(&format!("CopyContent failed on: [{label}]"), &e);
                Err(DeployError::Target {
                    target: label.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn copy_to_server(
        &self,
        plan: &DeploymentPlan,
        outputs: &[TransformOutput<'_>],
        server: &str,
    ) -> Result<u64> {
        let destination = plan
            .server_destination(server)
            .ok_or_else(|| DeployError::MissingServerDestination(server.to_string()))?;

        if plan.report.create_target_server_path && !self.storage.is_dir(&destination)? {
            self.storage.create_dir(&destination)?;
        }

        let start_modes = self.stop_server_processes(plan, server)?;
        let bytes = self.copy_to_destination(plan, outputs, &destination)?;
        self.start_server_processes(plan, server, &start_modes)?;
        Ok(bytes)
    }

    /// Truncate, copy, settle configs and apply the delete manifest.
    fn copy_to_destination(
        &self,
        plan: &DeploymentPlan,
        outputs: &[TransformOutput<'_>],
        destination: &Location,
    ) -> Result<u64> {
        if plan.spec.truncate_target_directory {
            self.storage.delete_tree(destination, true)?;
        }
        let bytes = self.storage.copy_tree(&plan.source, destination)?;
        self.rename_configs_at_target(outputs, destination)?;
        if plan.delete_manifest.has_paths() {
            self.delete_manifest_paths(plan, destination);
        }
        Ok(bytes)
    }

    /// Put each transformed config in place at `destination`, keeping the
    /// untransformed template as `<config>.backup.original`.
    fn rename_configs_at_target(
        &self,
        outputs: &[TransformOutput<'_>],
        destination: &Location,
    ) -> Result<()> {
        if outputs.is_empty() {
            return Ok(());
        }
        let context = self.context("UpdateConfigsAtTarget", "Config Files Will NOT Be Renamed.");
        for output in outputs {
            let config = destination.join(&output.pair.name);
            let transformed = config
                .parent()
                .unwrap_or_else(|| destination.clone())
                .join(&output.temp_name);

            if let Err(e) = self
                .storage
                .replace_file(&config, &config.with_suffix(".backup.original"))
            {
                tracing::debug!(%config, error = %e, "no template config to keep");
            }
            self.storage.replace_file(&transformed, &config)?;

            self.progress.step_progress(
                &context,
                &format!("Overwrote config file: {config}  [with]  {transformed}"),
            );
        }
        Ok(())
    }

    /// Delete every manifest path below `root`. Failures are recorded, never
    /// propagated.
    fn delete_manifest_paths(&self, plan: &DeploymentPlan, root: &Location) {
        let context = self.context("DeleteManifest", "Files Will NOT Be Deleted.");
        let warn = plan.delete_manifest.treat_exceptions_as_warnings;

        for path in &plan.delete_manifest.paths {
            let full = root.join(path);
            let deleted = self.storage.is_dir(&full).and_then(|is_dir| {
                if is_dir {
                    self.storage.delete_tree(&full, false)
                } else {
                    self.storage.delete_file(&full)
                }
            });
            match deleted {
                Ok(()) => self
                    .progress
                    .step_progress(&context, &format!("Deleted: [{full}]")),
                Err(e) => {
                    let kind = if warn { "Warning" } else { "Error" };
                    let message = format!(
                        "{kind}: DeleteManifestPaths failed on: [{full}], relativePath [{path}].  Exception: {}",
                        crate::events::error_chain(&e)
                    );
                    tracing::warn!("{message}");
                    self.progress
                        .step_progress(&format!("{context}:{kind}"), &message);
                    match self.manifest_exceptions.lock() {
                        Ok(mut exceptions) => exceptions.push(message),
                        Err(poisoned) => poisoned.into_inner().push(message),
                    }
                }
            }
        }
    }

    fn stop_server_processes(
        &self,
        plan: &DeploymentPlan,
        server: &str,
    ) -> Result<HashMap<String, StartMode>> {
        let stopped = plan
            .spec
            .services
            .par_iter()
            .map(|service| {
                self.stop_service(plan, server, service)
                    .map(|mode| (service.name.clone(), mode))
            })
            .collect();
        let start_modes = collect_all(stopped)?.into_iter().collect();

        let pools = plan
            .spec
            .app_pools
            .par_iter()
            .map(|pool| self.stop_app_pool(server, pool))
            .collect();
        collect_all(pools)?;
        Ok(start_modes)
    }

    fn start_server_processes(
        &self,
        plan: &DeploymentPlan,
        server: &str,
        start_modes: &HashMap<String, StartMode>,
    ) -> Result<()> {
        let started = plan
            .spec
            .services
            .par_iter()
            .map(|service| {
                let mode = start_modes
                    .get(&service.name)
                    .copied()
                    .unwrap_or(service.start_mode_on_start);
                self.start_service(plan, server, service, mode)
            })
            .collect();
        collect_all(started)?;

        let pools = plan
            .spec
            .app_pools
            .par_iter()
            .map(|pool| self.start_app_pool(server, pool))
            .collect();
        collect_all(pools)?;
        Ok(())
    }

    fn controller_error(
        action: &'static str,
        server: &str,
        target: &str,
    ) -> impl FnOnce(ControllerError) -> DeployError {
        move |source| DeployError::Controller {
            action,
            server: server.to_string(),
            target: target.to_string(),
            source,
        }
    }

    /// Binary path of a reprovisioned service, confined to the destination.
    fn service_path(plan: &DeploymentPlan, service: &ServiceDescriptor) -> Result<String> {
        let path = service.path.as_deref().unwrap_or_default();
        plan.service_path(path).ok_or_else(|| DeployError::ServicePath {
            service: service.name.clone(),
            path: path.to_string(),
            root: plan.spec.target_server_destination.clone().unwrap_or_default(),
        })
    }

    /// Stop one service, returning the start mode to restore it with.
    fn stop_service(
        &self,
        plan: &DeploymentPlan,
        server: &str,
        service: &ServiceDescriptor,
    ) -> Result<StartMode> {
        let context = self.context("StopServices", "Services Will NOT Be Stopped.");
        let controller = &self.workflow.controller;
        let name = service.name.as_str();
        self.progress.step_progress(
            &context,
            &format!(
                "{server}: {name}, {}, {:?}",
                service.stop_timeout_ms, service.start_mode_on_stop
            ),
        );

        let mut status = controller
            .query_service(name, server)
            .map_err(Self::controller_error("query service", server, name))?;
        let mut start_mode = service.start_mode_on_start;

        if !self.dry_run() {
            if status.is_running() {
                if start_mode == StartMode::Unchanged {
                    start_mode = status.start_mode;
                }
                controller
                    .stop_service(
                        name,
                        server,
                        Duration::from_millis(service.stop_timeout_ms),
                        service.start_mode_on_stop,
                    )
                    .map_err(Self::controller_error("stop service", server, name))?;
            }

            if service.reprovision {
                Self::service_path(plan, service)?;
                let code = controller
                    .delete_service(name, server)
                    .map_err(Self::controller_error("delete service", server, name))?;
                let outcome = match code {
                    ServiceReturnCode::Success => "successfully deleted",
                    ServiceReturnCode::ServiceNotFound => "not found",
                    code => {
                        return Err(DeployError::ServiceReturnCode {
                            action: "delete",
                            service: name.to_string(),
                            server: server.to_string(),
                            code,
                        });
                    }
                };
                self.progress.step_progress(
                    &context,
                    &format!("Reprovision = true, Service [{name}] {outcome}, proceeding."),
                );
            }

            status = controller
                .query_service(name, server)
                .map_err(Self::controller_error("query service", server, name))?;
        }

        self.progress.step_progress(&context, &status.to_string());
        Ok(start_mode)
    }

    fn start_service(
        &self,
        plan: &DeploymentPlan,
        server: &str,
        service: &ServiceDescriptor,
        start_mode: StartMode,
    ) -> Result<()> {
        let context = self.context("StartServices", "Services Will NOT Be Started.");
        let controller = &self.workflow.controller;
        let name = service.name.as_str();
        self.progress.step_progress(
            &context,
            &format!(
                "{server}: {name}, StartModeOnStart: {start_mode:?}, StartService: {}",
                service.start_service
            ),
        );

        if !self.dry_run() {
            if service.reprovision {
                let path = Self::service_path(plan, service)?;
                let password = match non_blank(&service.password) {
                    Some(ciphertext) => Some(
                        decrypt_password(self.workflow.decryptor.as_ref(), ciphertext).map_err(
                            |source| DeployError::Decrypt {
                                server: server.to_string(),
                                service: name.to_string(),
                                path: path.clone(),
                                source,
                            },
                        )?,
                    ),
                    None => None,
                };
                let user_name = non_blank(&service.user_name);
                let code = controller
                    .create_service(CreateServiceRequest {
                        name,
                        server,
                        display_name: name,
                        path: &path,
                        start_mode,
                        user_name,
                        password,
                        parameters: non_blank(&service.parameters),
                    })
                    .map_err(Self::controller_error("create service", server, name))?;
                if code != ServiceReturnCode::Success {
                    return Err(DeployError::ServiceReturnCode {
                        action: "create",
                        service: name.to_string(),
                        server: server.to_string(),
                        code,
                    });
                }
                self.progress.step_progress(
                    &context,
                    &format!(
                        "Reprovision = true, Service [{name}] on {server}:[{path}] with {} successfully created.",
                        user_name.unwrap_or_default()
                    ),
                );
            }

            if service.start_service {
                controller
                    .start_service(
                        name,
                        server,
                        Duration::from_millis(service.start_timeout_ms),
                        start_mode,
                    )
                    .map_err(Self::controller_error("start service", server, name))?;
            }
        }

        let status = controller
            .query_service(name, server)
            .map_err(Self::controller_error("query service", server, name))?;
        self.progress.step_progress(&context, &status.to_string());
        Ok(())
    }

    fn stop_app_pool(&self, server: &str, pool: &AppPoolDescriptor) -> Result<()> {
        let context = self.context("StopAppPools", "AppPools Will NOT Be Stopped.");
        let controller = &self.workflow.controller;
        let name = pool.name.as_str();
        self.progress
            .step_progress(&context, &format!("{server}: {name}"));
        if !self.dry_run() {
            controller
                .stop_app_pool(name, server, POOL_STOP)
                .map_err(Self::controller_error("stop app pool", server, name))?;
        }
        let status = controller
            .query_app_pool(name, server)
            .map_err(Self::controller_error("query app pool", server, name))?;
        self.progress.step_progress(&context, &status.to_string());
        Ok(())
    }

    fn start_app_pool(&self, server: &str, pool: &AppPoolDescriptor) -> Result<()> {
        let context = self.context("StartAppPools", "AppPools Will NOT Be Started.");
        let controller = &self.workflow.controller;
        let name = pool.name.as_str();
        self.progress.step_progress(
            &context,
            &format!("{server}: {name}, StartPool: {}", pool.start_pool),
        );
        if pool.start_pool && !self.dry_run() {
            controller
                .start_app_pool(name, server, POOL_START_TIMEOUT)
                .map_err(Self::controller_error("start app pool", server, name))?;
        }
        let status = controller
            .query_app_pool(name, server)
            .map_err(Self::controller_error("query app pool", server, name))?;
        self.progress.step_progress(&context, &status.to_string());
        Ok(())
    }

    /// Settle transform outputs at the source: in-place outputs replace the
    /// original, the rest are removed.
    fn update_config_originals(&self, outputs: &[TransformOutput<'_>]) -> Result<()> {
        let context = self.context("UpdateConfigOriginals", "No Files Will Be Modified.");
        if self
            .progress
            .step_starting(&context, &banner("Updating original config files."))
        {
            return Ok(());
        }
        let clock = Instant::now();

        for output in outputs {
            let original = &output.pair.config;
            if output.pair.transform_in_place {
                self.progress.step_progress(
                    &context,
                    &format!(
                        "Executing update on: BackupName:[{}], OriginalName:[{original}]",
                        output.temp
                    ),
                );
                self.storage
                    .replace_file(&output.temp, original)
                    .map_err(|e| {
                        let e = DeployError::from(e);
                        self.progress.step_failed(
                            &format!(
                                "UpdateConfigOriginals failed on: BackupName:[{}], OriginalName:[{original}]",
                                output.temp
                            ),
                            &e,
                        );
                        e
                    })?;
            } else if let Err(e) = self.storage.delete_file(&output.temp) {
                tracing::debug!(temp = %output.temp, error = %e, "leftover transform output not removed");
            }
        }

        self.progress.step_finished(
            &context,
            &banner(&format!(
                "End config files update, Total Execution Time: {}",
                elapsed(clock)
            )),
        );
        Ok(())
    }

    /// Move the source content into the next environment, merging with what
    /// is already there.
    fn move_to_next_environment(&self, plan: &DeploymentPlan, next: &Location) -> Result<()> {
        let context = "MoveToNextEnvironment";
        if self
            .progress
            .step_starting(context, &banner("Moving content to next environment."))
        {
            return Ok(());
        }
        let clock = Instant::now();

        if plan.spec.truncate_next_environment_directory {
            self.storage.delete_tree(next, true)?;
        }
        self.storage.move_tree(&plan.source, next, true)?;

        self.progress.step_finished(
            context,
            &banner(&format!(
                "End move to next environment, Total Execution Time: {}",
                elapsed(clock)
            )),
        );
        Ok(())
    }
}
