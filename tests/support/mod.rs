#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use copyflow::credentials::{Decrypt, DecryptError};
use copyflow::events::{EventSink, LogEvent, ProgressEvent};
use copyflow::lifecycle::{
    AppPoolStatus, ControllerError, CreateServiceRequest, PoolStop, ProcessController,
    ServiceReturnCode, ServiceStatus, StartMode, TaskStatus,
};
use copyflow::transform::TransformError;

/// Collects both event streams; optionally asks to cancel when a step with
/// the given context starts.
#[derive(Default)]
pub struct CollectingSink {
    pub progress: Mutex<Vec<ProgressEvent>>,
    pub logs: Mutex<Vec<LogEvent>>,
    cancel_at: Option<String>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancelling_at(context: &str) -> Arc<Self> {
        Arc::new(Self {
            cancel_at: Some(context.to_string()),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.progress.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.logs.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.context).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl EventSink for CollectingSink {
    fn progress(&self, event: &ProgressEvent) -> bool {
        self.progress.lock().unwrap().push(event.clone());
        self.cancel_at.as_deref() == Some(event.context.as_str())
    }

    fn log(&self, event: &LogEvent) {
        self.logs.lock().unwrap().push(event.clone());
    }
}

/// Process controller that records every call. Services start out running
/// with an automatic start mode; servers listed in `unreachable` fail every
/// call.
#[derive(Default)]
pub struct RecordingController {
    pub calls: Mutex<Vec<String>>,
    stopped: Mutex<HashSet<(String, String)>>,
    pub unreachable: HashSet<String>,
    pub passwords: Mutex<Vec<String>>,
}

impl RecordingController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable(servers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            unreachable: servers.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Every call except queries.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("query"))
            .collect()
    }

    fn record(&self, call: String, server: &str) -> Result<(), ControllerError> {
        self.calls.lock().unwrap().push(call);
        if self.unreachable.contains(server) {
            return Err(ControllerError::Failed(format!("{server} is unreachable")));
        }
        Ok(())
    }

    fn running(&self, name: &str, server: &str) -> bool {
        !self
            .stopped
            .lock()
            .unwrap()
            .contains(&(server.to_string(), name.to_string()))
    }

    fn set_running(&self, name: &str, server: &str, running: bool) {
        let key = (server.to_string(), name.to_string());
        let mut stopped = self.stopped.lock().unwrap();
        if running {
            stopped.remove(&key);
        } else {
            stopped.insert(key);
        }
    }
}

impl ProcessController for RecordingController {
    fn query_service(&self, name: &str, server: &str) -> Result<ServiceStatus, ControllerError> {
        self.record(format!("query_service {server} {name}"), server)?;
        let running = self.running(name, server);
        Ok(ServiceStatus {
            server: server.to_string(),
            name: name.to_string(),
            state: if running { "Running" } else { "Stopped" }.to_string(),
            process_id: if running { 4242 } else { 0 },
            start_mode: StartMode::Automatic,
        })
    }

    fn stop_service(
        &self,
        name: &str,
        server: &str,
        _timeout: Duration,
        _start_mode: StartMode,
    ) -> Result<(), ControllerError> {
        self.record(format!("stop_service {server} {name}"), server)?;
        self.set_running(name, server, false);
        Ok(())
    }

    fn start_service(
        &self,
        name: &str,
        server: &str,
        _timeout: Duration,
        start_mode: StartMode,
    ) -> Result<(), ControllerError> {
        self.record(format!("start_service {server} {name} {start_mode:?}"), server)?;
        self.set_running(name, server, true);
        Ok(())
    }

    fn create_service(
        &self,
        request: CreateServiceRequest<'_>,
    ) -> Result<ServiceReturnCode, ControllerError> {
        self.record(
            format!("create_service {} {} {}", request.server, request.name, request.path),
            request.server,
        )?;
        if let Some(password) = &request.password {
            self.passwords
                .lock()
                .unwrap()
                .push(password.expose_secret().to_string());
        }
        Ok(ServiceReturnCode::Success)
    }

    fn delete_service(&self, name: &str, server: &str) -> Result<ServiceReturnCode, ControllerError> {
        self.record(format!("delete_service {server} {name}"), server)?;
        Ok(ServiceReturnCode::ServiceNotFound)
    }

    fn query_app_pool(&self, name: &str, server: &str) -> Result<AppPoolStatus, ControllerError> {
        self.record(format!("query_app_pool {server} {name}"), server)?;
        Ok(AppPoolStatus {
            server: server.to_string(),
            name: name.to_string(),
            state: "Started".to_string(),
        })
    }

    fn start_app_pool(&self, name: &str, server: &str, _timeout: Duration) -> Result<(), ControllerError> {
        self.record(format!("start_app_pool {server} {name}"), server)
    }

    fn stop_app_pool(&self, name: &str, server: &str, _policy: PoolStop) -> Result<(), ControllerError> {
        self.record(format!("stop_app_pool {server} {name}"), server)
    }

    fn recycle_app_pool(&self, name: &str, server: &str, _timeout: Duration) -> Result<(), ControllerError> {
        self.record(format!("recycle_app_pool {server} {name}"), server)
    }

    fn query_task(&self, name: &str, server: &str) -> Result<TaskStatus, ControllerError> {
        self.record(format!("query_task {server} {name}"), server)?;
        Ok(TaskStatus {
            server: server.to_string(),
            name: name.to_string(),
            state: "Ready".to_string(),
        })
    }

    fn start_task(&self, name: &str, server: &str) -> Result<(), ControllerError> {
        self.record(format!("start_task {server} {name}"), server)
    }

    fn stop_task(&self, name: &str, server: &str) -> Result<(), ControllerError> {
        self.record(format!("stop_task {server} {name}"), server)
    }
}

/// Reverses the ciphertext; `"bad"` decrypts to the cipher's failure text.
pub struct ReverseDecryptor;

impl Decrypt for ReverseDecryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<SecretString, DecryptError> {
        match ciphertext {
            "bad" => return Ok(SecretString::from("Unable to decrypt".to_string())),
            "blank" => return Ok(SecretString::from("  ".to_string())),
            _ => {}
        }
        Ok(SecretString::from(ciphertext.chars().rev().collect::<String>()))
    }
}

/// Appends the transform document to the config.
pub fn append_transform(document: &str, transform: &str) -> Result<String, TransformError> {
    Ok(format!("{document}{transform}"))
}

pub fn failing_transform(_document: &str, _transform: &str) -> Result<String, TransformError> {
    Err(TransformError::Malformed("unexpected end of document".into()))
}

pub fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Relative path -> content of every file below `root`.
pub fn snapshot(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (rel, fs::read_to_string(entry.path()).unwrap_or_default())
        })
        .collect()
}

/// Every directory below `root`, relative.
pub fn directories(root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().strip_prefix(root).unwrap().display().to_string())
        .collect()
}

/// A deployment tree:
///
/// ```text
/// <root>/release/            source, with web.config + web.Release.config
/// <root>/servers/<s>/app     one per server
/// <root>/remote              remote target
/// <root>/backup/{remote,server}
/// ```
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub servers: Vec<String>,
}

impl Fixture {
    pub fn new(servers: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("release/index.html"), "v2 index");
        write(&root.join("release/bin/app.dll"), "v2 dll");
        write(&root.join("release/web.config"), "<config/>");
        write(&root.join("release/web.Release.config"), "<release/>");
        for server in servers {
            write(&root.join(format!("servers/{server}/app/index.html")), "v1 index");
            write(&root.join(format!("servers/{server}/app/obsolete.txt")), "old");
        }
        write(&root.join("remote/index.html"), "v1 remote index");
        fs::create_dir_all(root.join("backup/remote")).unwrap();
        fs::create_dir_all(root.join("backup/server")).unwrap();
        Self {
            dir,
            servers: servers.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn server_app(&self, server: &str) -> PathBuf {
        self.path(&format!("servers/{server}/app"))
    }

    /// Parameter document for the fixture; extend with `extra`.
    pub fn spec(&self, extra: serde_json::Value) -> copyflow::model::DeploymentSpec {
        let mut document = serde_json::json!({
            "deployment_root": self.root().display().to_string(),
            "source_directory": "release",
            "servers": self.servers,
            "target_server_destination": "app",
            "server_path_template": format!("{}/servers/{{server}}/{{path}}", self.root().display()),
        });
        if let (Some(base), Some(extra)) = (document.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(document).unwrap()
    }
}

pub fn counts(calls: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for call in calls {
        let verb = call.split(' ').next().unwrap_or_default().to_string();
        *counts.entry(verb).or_insert(0) += 1;
    }
    counts
}

pub fn tree(files: &[(&str, &str)]) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect()
}
