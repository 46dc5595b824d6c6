use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::object_store::{DirObjectClient, ObjectClient};

/// Handler-level settings shared by every run of the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    pub object_store: ObjectStoreConfig,
    /// Fallback tracing filter when `COPYFLOW_LOG` is unset.
    pub log_level: Option<String>,
    /// Pause between stop and start when a service task restarts its target.
    pub restart_delay_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            object_store: ObjectStoreConfig::default(),
            log_level: None,
            restart_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectStoreConfig {
    /// Directory backing `s3://bucket/key` as `<mirror_root>/bucket/key`.
    pub mirror_root: Option<PathBuf>,
}

impl HandlerConfig {
    /// Read the config at `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&text).map_err(anyhow::Error::from)
        } else {
            serde_json::from_str(&text).map_err(anyhow::Error::from)
        };
        config.with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn object_client(&self) -> Option<Arc<dyn ObjectClient>> {
        self.object_store
            .mirror_root
            .as_ref()
            .map(|root| Arc::new(DirObjectClient::new(root.clone())) as Arc<dyn ObjectClient>)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}
