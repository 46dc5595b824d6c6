//! Process lifecycle capability: services, application pools and scheduled
//! tasks on a named host.
//!
//! The orchestrator decides when to stop, start, delete or recreate; a
//! [`ProcessController`] only carries the request out. Escalating a stop that
//! overruns its timeout into a forced kill is the controller's business.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Start mode a service is left in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Keep whatever mode the service already has.
    #[default]
    Unchanged,
    System,
    Automatic,
    Manual,
    Disabled,
    Boot,
}

/// Result code of a service-control request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceReturnCode {
    Success,
    NotSupported,
    AccessDenied,
    DependentServicesRunningOrInsufficientPrivilege,
    InvalidServiceControl,
    ServiceCannotAcceptControl,
    ServiceNotActive,
    ServiceRequestTimeout,
    UnknownFailure,
    PathNotFound,
    ServiceAlreadyRunning,
    ServiceDatabaseLocked,
    ServiceDependencyDeleted,
    ServiceDependencyFailure,
    ServiceDisabled,
    ServiceLogonFailure,
    ServiceMarkedForDeletion,
    ServiceNoThread,
    StatusCircularDependency,
    StatusDuplicateName,
    StatusInvalidName,
    StatusInvalidParameter,
    StatusInvalidServiceAccount,
    StatusServiceExists,
    ServiceAlreadyPaused,
    ServiceNotFound,
}

impl ServiceReturnCode {
    /// Numeric code as reported by the service control manager.
    pub fn code(self) -> u32 {
        match self {
            ServiceReturnCode::ServiceNotFound => 350,
            other => other as u32,
        }
    }
}

impl fmt::Display for ServiceReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

/// Snapshot of one service on one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub server: String,
    pub name: String,
    pub state: String,
    /// Zero when the service has no running process.
    pub process_id: u32,
    pub start_mode: StartMode,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        self.process_id > 0
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] service {}: state={}, pid={}, start_mode={:?}",
            self.server, self.name, self.state, self.process_id, self.start_mode
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppPoolStatus {
    pub server: String,
    pub name: String,
    pub state: String,
}

impl fmt::Display for AppPoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] app pool {}: state={}", self.server, self.name, self.state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatus {
    pub server: String,
    pub name: String,
    pub state: String,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] scheduled task {}: state={}", self.server, self.name, self.state)
    }
}

/// Everything needed to register a service. The password is already
/// decrypted and must not outlive the request.
#[derive(Debug)]
pub struct CreateServiceRequest<'a> {
    pub name: &'a str,
    pub server: &'a str,
    pub display_name: &'a str,
    pub path: &'a str,
    pub start_mode: StartMode,
    pub user_name: Option<&'a str>,
    pub password: Option<SecretString>,
    pub parameters: Option<&'a str>,
}

/// Retry policy for stopping an application pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStop {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_wait: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("process control is not available on this host")]
    Unavailable,

    #[error("{target} on {server} did not reach the requested state within {timeout:?}")]
    Timeout {
        target: String,
        server: String,
        timeout: Duration,
    },

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Service, application-pool and scheduled-task control on a named host.
/// Every method blocks until the request completes or times out.
pub trait ProcessController: Send + Sync {
    fn query_service(&self, name: &str, server: &str) -> Result<ServiceStatus>;

    fn stop_service(
        &self,
        name: &str,
        server: &str,
        timeout: Duration,
        start_mode_after: StartMode,
    ) -> Result<()>;

    fn start_service(
        &self,
        name: &str,
        server: &str,
        timeout: Duration,
        start_mode: StartMode,
    ) -> Result<()>;

    fn create_service(&self, request: CreateServiceRequest<'_>) -> Result<ServiceReturnCode>;

    fn delete_service(&self, name: &str, server: &str) -> Result<ServiceReturnCode>;

    fn query_app_pool(&self, name: &str, server: &str) -> Result<AppPoolStatus>;

    fn start_app_pool(&self, name: &str, server: &str, timeout: Duration) -> Result<()>;

    fn stop_app_pool(&self, name: &str, server: &str, policy: PoolStop) -> Result<()>;

    fn recycle_app_pool(&self, name: &str, server: &str, timeout: Duration) -> Result<()>;

    fn query_task(&self, name: &str, server: &str) -> Result<TaskStatus>;

    fn start_task(&self, name: &str, server: &str) -> Result<()>;

    fn stop_task(&self, name: &str, server: &str) -> Result<()>;
}

/// Controller for hosts without process control. Every call fails, so a
/// deployment that names services or app pools fails loudly instead of
/// silently skipping them.
pub struct UnavailableController;

impl ProcessController for UnavailableController {
    fn query_service(&self, _name: &str, _server: &str) -> Result<ServiceStatus> {
        Err(ControllerError::Unavailable)
    }

    fn stop_service(&self, _: &str, _: &str, _: Duration, _: StartMode) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn start_service(&self, _: &str, _: &str, _: Duration, _: StartMode) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn create_service(&self, _request: CreateServiceRequest<'_>) -> Result<ServiceReturnCode> {
        Err(ControllerError::Unavailable)
    }

    fn delete_service(&self, _name: &str, _server: &str) -> Result<ServiceReturnCode> {
        Err(ControllerError::Unavailable)
    }

    fn query_app_pool(&self, _name: &str, _server: &str) -> Result<AppPoolStatus> {
        Err(ControllerError::Unavailable)
    }

    fn start_app_pool(&self, _: &str, _: &str, _: Duration) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn stop_app_pool(&self, _: &str, _: &str, _: PoolStop) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn recycle_app_pool(&self, _: &str, _: &str, _: Duration) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn query_task(&self, _name: &str, _server: &str) -> Result<TaskStatus> {
        Err(ControllerError::Unavailable)
    }

    fn start_task(&self, _name: &str, _server: &str) -> Result<()> {
        Err(ControllerError::Unavailable)
    }

    fn stop_task(&self, _name: &str, _server: &str) -> Result<()> {
        Err(ControllerError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_its_scm_code() {
        assert_eq!(ServiceReturnCode::Success.code(), 0);
        assert_eq!(ServiceReturnCode::ServiceAlreadyPaused.code(), 24);
        assert_eq!(ServiceReturnCode::ServiceNotFound.code(), 350);
        assert_eq!(ServiceReturnCode::AccessDenied.to_string(), "AccessDenied (2)");
    }

    #[test]
    fn start_mode_defaults_to_unchanged() {
        let mode: StartMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, StartMode::Manual);
        assert_eq!(StartMode::default(), StartMode::Unchanged);
    }
}
