use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::lifecycle::StartMode;

/// Root parameter document describing one deployment.
///
/// Paths may be POSIX, Windows drive or UNC paths, or `s3://bucket/key`
/// URLs. Relative source, next-environment and backup paths are resolved
/// under `deployment_root`; config, transform and manifest names are
/// relative to the source directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSpec {
    /// Root that relative source and backup paths hang off.
    #[serde(default)]
    pub deployment_root: String,
    /// Released content to deploy.
    pub source_directory: String,
    /// Staging area the source content moves to after a successful deploy.
    #[serde(default)]
    pub next_environment_source_directory: Option<String>,
    /// Empty the next-environment directory before promoting into it.
    #[serde(default)]
    pub truncate_next_environment_directory: bool,
    /// Remote share or bucket that receives a copy of the source.
    #[serde(default)]
    pub target_remote_destination: Option<String>,
    /// Where currently deployed remote content is backed up.
    #[serde(default)]
    pub backup_remote_destination: Option<String>,
    /// Servers, in order; the first one is the one that gets backed up.
    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: Vec<String>,
    /// Server-local destination path, e.g. `D:\apps\site`.
    #[serde(default)]
    pub target_server_destination: Option<String>,
    /// Where the first server's deployed content is backed up.
    #[serde(default)]
    pub backup_server_destination: Option<String>,
    /// Empty each destination before copying.
    #[serde(default)]
    pub truncate_target_directory: bool,
    /// How a server name and its local path become a reachable path.
    /// Placeholders: `{server}`, `{path}`. Defaults to `\\{server}\{path}`.
    #[serde(default)]
    pub server_path_template: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delete_manifest: DeleteManifestSpec,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_pools: Vec<AppPoolDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config_files: Vec<ConfigFileSpec>,
}

impl DeploymentSpec {
    /// The promotion target, if one is configured.
    pub fn next_environment(&self) -> Option<&str> {
        non_blank(&self.next_environment_source_directory)
    }

    pub fn requires_reprovision(&self) -> bool {
        self.services.iter().any(|s| s.reprovision)
    }
}

/// `Some(trimmed)` when the value is set and not whitespace.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A Windows service stopped before and started after each server copy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Executable path relative to the target server destination; used when
    /// the service is reprovisioned.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_service_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_service_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default)]
    pub start_mode_on_start: StartMode,
    #[serde(default)]
    pub start_mode_on_stop: StartMode,
    #[serde(default)]
    pub start_service: bool,
    /// Delete the service on stop and create it again on start.
    #[serde(default)]
    pub reprovision: bool,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Encrypted; decrypted immediately before the service is created.
    #[serde(default)]
    pub password: Option<String>,
    /// Extra launch parameters.
    #[serde(default)]
    pub parameters: Option<String>,
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AppPoolDescriptor {
    pub name: String,
    #[serde(default)]
    pub start_pool: bool,
}

/// A config file and the transform applied to it before the copy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileSpec {
    pub name: String,
    /// Entries without a transform are ignored.
    #[serde(default)]
    pub transform_file: Option<String>,
    /// Also replace the source-side config with the transformed output.
    #[serde(default)]
    pub transform_in_place: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteManifestSpec {
    /// Manifest of relative paths to delete at every target, one per line.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Report deletion failures as warnings (`completed_with_errors`).
    #[serde(default)]
    pub treat_exceptions_as_warnings: bool,
}

/// Deserialize a field that may be present as `null`, treating it as absent.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Generate JSON Schema for the parameter document.
pub fn generate_schema() -> Result<String> {
    let schema = schemars::schema_for!(DeploymentSpec);
    serde_json::to_string_pretty(&schema).context("failed to serialize schema")
}

/// Load a parameter document; `.yaml`/`.yml` files are read as YAML,
/// everything else as JSON.
pub fn load_spec(path: &Path) -> Result<DeploymentSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    let spec = if is_yaml {
        from_yaml(&text)
    } else {
        from_json(&text)
    };
    spec.with_context(|| format!("invalid parameter document {}", path.display()))
}

pub fn from_json(json: &str) -> Result<DeploymentSpec> {
    Ok(serde_json::from_str(json)?)
}

pub fn from_yaml(yaml: &str) -> Result<DeploymentSpec> {
    Ok(serde_yaml::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_lists_become_empty() {
        let spec = from_json(
            r#"{
                "source_directory": "release",
                "servers": null,
                "services": null,
                "app_pools": null,
                "config_files": null,
                "delete_manifest": null
            }"#,
        )
        .unwrap();
        assert!(spec.servers.is_empty());
        assert!(spec.services.is_empty());
        assert!(spec.app_pools.is_empty());
        assert!(spec.config_files.is_empty());
        assert!(spec.delete_manifest.file_name.is_none());
    }

    #[test]
    fn service_defaults() {
        let spec = from_yaml(
            "source_directory: release\nservices:\n  - name: Worker\n    start_mode_on_stop: disabled\n",
        )
        .unwrap();
        let service = &spec.services[0];
        assert_eq!(service.stop_timeout_ms, 30_000);
        assert_eq!(service.start_mode_on_start, StartMode::Unchanged);
        assert_eq!(service.start_mode_on_stop, StartMode::Disabled);
        assert!(!service.reprovision);
    }

    #[test]
    fn blank_next_environment_is_not_configured() {
        let mut spec = DeploymentSpec {
            next_environment_source_directory: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(spec.next_environment(), None);
        spec.next_environment_source_directory = Some(" next ".into());
        assert_eq!(spec.next_environment(), Some("next"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(from_json(r#"{"source_directory": "a", "sorce": "b"}"#).is_err());
    }
}
