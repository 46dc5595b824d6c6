use serde::Serialize;

use crate::model::{DeploymentSpec, non_blank};
use crate::resolve;
use crate::storage::{Location, Storage};

/// A validated deployment: every location resolved to absolute form plus the
/// immutable report of what was found. Built once per run by [`validate`].
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub spec: DeploymentSpec,
    pub source: Location,
    pub next_environment: Option<Location>,
    pub target_remote: Option<Location>,
    pub backup_remote: Option<Location>,
    /// Backup root for the first server; only set when there is a server list
    /// and a target server destination.
    pub backup_server: Option<Location>,
    pub server_path_template: String,
    pub delete_manifest: DeleteManifest,
    /// Config files that declare a transform, in document order.
    pub transforms: Vec<TransformPair>,
    pub report: ValidationReport,
}

impl DeploymentPlan {
    /// Reachable destination path for `server`, if a server destination is set.
    pub fn server_destination(&self, server: &str) -> Option<Location> {
        let local = non_blank(&self.spec.target_server_destination)?;
        Some(Location::parse(&resolve::server_path(
            &self.server_path_template,
            server,
            local,
        )))
    }

    /// Server-local destination joined with a service's relative path.
    pub fn service_path(&self, path: &str) -> Option<String> {
        let root = non_blank(&self.spec.target_server_destination)?;
        resolve::confine(root, path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteManifest {
    pub file: Option<Location>,
    pub treat_exceptions_as_warnings: bool,
    /// Trimmed, non-blank lines of the manifest.
    pub paths: Vec<String>,
}

impl DeleteManifest {
    pub fn has_paths(&self) -> bool {
        !self.paths.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TransformPair {
    pub name: String,
    pub transform_file: String,
    pub transform_in_place: bool,
    pub config: Location,
    pub transform: Location,
    pub config_exists: bool,
    pub transform_exists: bool,
}

impl TransformPair {
    pub fn is_valid(&self) -> bool {
        self.config_exists && self.transform_exists
    }
}

/// Outcome of every existence probe. Unconfigured locations are vacuously
/// valid.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub source_directory: bool,
    pub target_remote_destination: bool,
    pub backup_remote_destination: bool,
    pub target_server_path: bool,
    pub backup_server_destination: bool,
    pub delete_manifest: bool,
    pub config_transform_file_list: bool,
    /// Reported but not part of [`ValidationReport::is_valid`].
    pub next_environment_directory: Option<bool>,
    /// Some service is reprovisioned, so server paths are created rather
    /// than required to exist.
    pub create_target_server_path: bool,
}

impl ValidationReport {
    fn checks(&self) -> [(&'static str, bool); 7] {
        [
            ("source_directory", self.source_directory),
            ("target_remote_destination", self.target_remote_destination),
            ("backup_remote_destination", self.backup_remote_destination),
            ("target_server_path", self.target_server_path),
            ("backup_server_destination", self.backup_server_destination),
            ("delete_manifest", self.delete_manifest),
            ("config_transform_file_list", self.config_transform_file_list),
        ]
    }

    pub fn is_valid(&self) -> bool {
        self.checks().iter().all(|(_, ok)| *ok)
    }

    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks()
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }
}

// A probe that errors counts as "not there".
fn dir_exists(storage: &Storage, location: &Location) -> bool {
    match storage.is_dir(location) {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(%location, error = %e, "directory probe failed");
            false
        }
    }
}

fn file_exists(storage: &Storage, location: &Location) -> bool {
    match (storage.exists(location), storage.is_dir(location)) {
        (Ok(exists), Ok(is_dir)) => exists && !is_dir,
        (Err(e), _) | (_, Err(e)) => {
            tracing::debug!(%location, error = %e, "file probe failed");
            false
        }
    }
}

/// Resolve every path of `spec` and probe the referenced locations. Reads
/// only; the document is not modified and already-absolute paths are left as
/// they are.
pub fn validate(spec: &DeploymentSpec, storage: &Storage) -> DeploymentPlan {
    let root = spec.deployment_root.trim();
    let under_root = |path: &str| Location::parse(&resolve::resolve_under(root, path));

    let source = under_root(&spec.source_directory);
    let source_directory = dir_exists(storage, &source);

    let next_environment = spec.next_environment().map(under_root);
    let next_environment_directory = next_environment
        .as_ref()
        .map(|location| dir_exists(storage, location));

    let target_remote = non_blank(&spec.target_remote_destination).map(Location::parse);
    let target_remote_destination = target_remote
        .as_ref()
        .is_none_or(|location| dir_exists(storage, location));

    let backup_remote = non_blank(&spec.backup_remote_destination).map(under_root);
    let backup_remote_destination = backup_remote
        .as_ref()
        .is_none_or(|location| dir_exists(storage, location));

    let server_path_template = non_blank(&spec.server_path_template)
        .unwrap_or(resolve::DEFAULT_SERVER_PATH_TEMPLATE)
        .to_string();
    let create_target_server_path = spec.requires_reprovision();
    let mut target_server_path = true;
    let mut backup_server = None;
    let mut backup_server_destination = true;
    if let Some(local) = non_blank(&spec.target_server_destination)
        && !spec.servers.is_empty()
    {
        if !create_target_server_path {
            target_server_path = spec.servers.iter().all(|server| {
                let destination =
                    Location::parse(&resolve::server_path(&server_path_template, server, local));
                dir_exists(storage, &destination)
            });
        }
        if let Some(backup) = non_blank(&spec.backup_server_destination) {
            let backup = under_root(backup);
            backup_server_destination = dir_exists(storage, &backup);
            backup_server = Some(backup);
        }
    }

    let mut delete_manifest = DeleteManifest {
        treat_exceptions_as_warnings: spec.delete_manifest.treat_exceptions_as_warnings,
        ..Default::default()
    };
    let mut delete_manifest_valid = true;
    if let Some(file_name) = non_blank(&spec.delete_manifest.file_name) {
        let file = source.join(file_name);
        delete_manifest_valid = file_exists(storage, &file);
        if delete_manifest_valid {
            match storage.read_all_lines(&file) {
                Ok(lines) => {
                    delete_manifest.paths = lines
                        .iter()
                        .map(|line| line.trim())
                        .filter(|line| !line.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(%file, error = %e, "delete manifest could not be read");
                    delete_manifest_valid = false;
                }
            }
        }
        delete_manifest.file = Some(file);
    }

    let transforms: Vec<TransformPair> = spec
        .config_files
        .iter()
        .filter_map(|cf| {
            let transform_file = non_blank(&cf.transform_file)?;
            let config = source.join(cf.name.trim());
            let transform = source.join(transform_file);
            Some(TransformPair {
                name: cf.name.trim().to_string(),
                transform_file: transform_file.to_string(),
                transform_in_place: cf.transform_in_place,
                config_exists: file_exists(storage, &config),
                transform_exists: file_exists(storage, &transform),
                config,
                transform,
            })
        })
        .collect();
    let config_transform_file_list = transforms.iter().all(TransformPair::is_valid);

    let report = ValidationReport {
        source_directory,
        target_remote_destination,
        backup_remote_destination,
        target_server_path,
        backup_server_destination,
        delete_manifest: delete_manifest_valid,
        config_transform_file_list,
        next_environment_directory,
        create_target_server_path,
    };
    tracing::debug!(valid = report.is_valid(), failed = ?report.failed_checks(), "validated parameters");

    DeploymentPlan {
        spec: spec.clone(),
        source,
        next_environment,
        target_remote,
        backup_remote,
        backup_server,
        server_path_template,
        delete_manifest,
        transforms,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, Progress, ProgressEvent};
    use crate::model::{ConfigFileSpec, DeleteManifestSpec, ServiceDescriptor};
    use std::fs;
    use std::sync::Arc;

    struct Quiet;

    impl EventSink for Quiet {
        fn progress(&self, _event: &ProgressEvent) -> bool {
            false
        }
    }

    fn storage() -> Storage {
        let progress = Arc::new(Progress::new(Arc::new(Quiet), uuid::Uuid::new_v4()));
        Storage::new(None, false, progress)
    }

    fn spec(root: &std::path::Path) -> DeploymentSpec {
        DeploymentSpec {
            deployment_root: root.display().to_string(),
            source_directory: "release".into(),
            server_path_template: Some(format!("{}/servers/{{server}}/{{path}}", root.display())),
            ..Default::default()
        }
    }

    fn service(reprovision: bool) -> ServiceDescriptor {
        serde_json::from_value(serde_json::json!({
            "name": "Worker",
            "reprovision": reprovision
        }))
        .unwrap()
    }

    #[test]
    fn source_directory_is_resolved_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec(dir.path());

        let plan = validate(&spec, &storage());
        assert!(!plan.report.source_directory);
        assert_eq!(plan.report.failed_checks(), vec!["source_directory"]);

        fs::create_dir(dir.path().join("release")).unwrap();
        let plan = validate(&spec, &storage());
        assert!(plan.report.is_valid());
        assert_eq!(plan.source, Location::Local(dir.path().join("release")));
    }

    #[test]
    fn absolute_source_is_not_prefixed_twice() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("release")).unwrap();
        let mut spec = spec(dir.path());
        spec.source_directory = dir.path().join("release").display().to_string();

        let plan = validate(&spec, &storage());
        assert!(plan.report.source_directory);
        assert_eq!(plan.source, Location::Local(dir.path().join("release")));
    }

    #[test]
    fn one_missing_server_invalidates_server_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release")).unwrap();
        fs::create_dir_all(dir.path().join("servers/web01/app")).unwrap();
        let mut spec = spec(dir.path());
        spec.servers = vec!["web01".into(), "web02".into()];
        spec.target_server_destination = Some("app".into());

        let plan = validate(&spec, &storage());
        assert!(!plan.report.target_server_path);
        assert!(!plan.report.is_valid());

        fs::create_dir_all(dir.path().join("servers/web02/app")).unwrap();
        assert!(validate(&spec, &storage()).report.target_server_path);
    }

    #[test]
    fn reprovisioning_skips_server_path_probe() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release")).unwrap();
        let mut spec = spec(dir.path());
        spec.servers = vec!["web01".into()];
        spec.target_server_destination = Some("app".into());
        spec.services = vec![service(false), service(true)];

        let plan = validate(&spec, &storage());
        assert!(plan.report.create_target_server_path);
        assert!(plan.report.target_server_path);
    }

    #[test]
    fn backup_server_destination_needs_servers() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release")).unwrap();
        let mut spec = spec(dir.path());
        spec.backup_server_destination = Some("backup".into());

        let plan = validate(&spec, &storage());
        assert!(plan.backup_server.is_none());
        assert!(plan.report.backup_server_destination);

        spec.servers = vec!["web01".into(), "web02".into()];
        spec.target_server_destination = Some("app".into());
        spec.services = vec![service(true)];
        let plan = validate(&spec, &storage());
        assert_eq!(plan.backup_server, Some(Location::Local(dir.path().join("backup"))));
        assert!(!plan.report.backup_server_destination);
    }

    #[test]
    fn manifest_lines_are_trimmed_and_blanks_dropped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release")).unwrap();
        fs::write(dir.path().join("release/delete.txt"), "old.dll\n\n  bin/stale  \n\t\n").unwrap();
        let mut spec = spec(dir.path());
        spec.delete_manifest = DeleteManifestSpec {
            file_name: Some("delete.txt".into()),
            treat_exceptions_as_warnings: true,
        };

        let plan = validate(&spec, &storage());
        assert!(plan.report.delete_manifest);
        assert_eq!(plan.delete_manifest.paths, vec!["old.dll", "bin/stale"]);
        assert!(plan.delete_manifest.has_paths());

        spec.delete_manifest.file_name = Some("missing.txt".into());
        let plan = validate(&spec, &storage());
        assert!(!plan.report.delete_manifest);
        assert!(!plan.delete_manifest.has_paths());
    }

    #[test]
    fn only_configs_with_transforms_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release")).unwrap();
        fs::write(dir.path().join("release/web.config"), "<c/>").unwrap();
        let mut spec = spec(dir.path());
        spec.config_files = vec![
            ConfigFileSpec {
                name: "plain.config".into(),
                transform_file: None,
                transform_in_place: false,
            },
            ConfigFileSpec {
                name: "web.config".into(),
                transform_file: Some("web.prod.config".into()),
                transform_in_place: false,
            },
        ];

        let plan = validate(&spec, &storage());
        assert_eq!(plan.transforms.len(), 1);
        assert!(plan.transforms[0].config_exists);
        assert!(!plan.transforms[0].transform_exists);
        assert!(!plan.report.config_transform_file_list);

        fs::write(dir.path().join("release/web.prod.config"), "<t/>").unwrap();
        assert!(validate(&spec, &storage()).report.is_valid());
    }

    #[test]
    fn service_paths_stay_under_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path());
        spec.target_server_destination = Some(r"D:\apps".into());
        let plan = validate(&spec, &storage());

        assert_eq!(plan.service_path(r"svc\run.exe").as_deref(), Some(r"D:\apps\svc\run.exe"));
        assert_eq!(plan.service_path(r"..\evil.exe"), None);
    }
}
