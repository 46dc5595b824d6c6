use crate::credentials::DecryptError;
use crate::lifecycle::{ControllerError, ServiceReturnCode};
use crate::storage::StorageError;
use crate::transform::TransformError;

/// Failures that abort a deployment phase or a single target.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("parameters failed validation: {}", .failed.join(", "))]
    Validation { failed: Vec<&'static str> },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{action} failed for {target} on {server}")]
    Controller {
        action: &'static str,
        server: String,
        target: String,
        #[source]
        source: ControllerError,
    },

    #[error("could not {action} service [{service}] on {server}: {code}")]
    ServiceReturnCode {
        action: &'static str,
        service: String,
        server: String,
        code: ServiceReturnCode,
    },

    #[error("config transform failed on config [{config}] with transform [{transform}]")]
    Transform {
        config: String,
        transform: String,
        #[source]
        source: TransformError,
    },

    #[error("unable to decrypt password for service configuration: {server}, {service}:[{path}]")]
    Decrypt {
        server: String,
        service: String,
        path: String,
        #[source]
        source: DecryptError,
    },

    #[error("service [{service}] path [{path}] is outside the destination root [{root}]")]
    ServicePath {
        service: String,
        path: String,
        root: String,
    },

    #[error("no target server destination is configured for server [{0}]")]
    MissingServerDestination(String),

    #[error("copy to [{target}] failed")]
    Target {
        target: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("{} targets failed: {}", .0.len(), render_all(.0))]
    Aggregate(Vec<DeployError>),
}

pub type Result<T> = std::result::Result<T, DeployError>;

fn render_all(errors: &[DeployError]) -> String {
    errors
        .iter()
        .map(|e| crate::events::error_chain(e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collapse the results of sibling tasks: every task has already run to
/// completion, one failure is returned as itself, several as an aggregate.
pub fn collect_all<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }
    match errors.len() {
        0 => Ok(values),
        1 => Err(errors.remove(0)),
        _ => Err(DeployError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str) -> DeployError {
        DeployError::Target {
            target: name.into(),
            source: Box::new(DeployError::Validation { failed: vec!["x"] }),
        }
    }

    #[test]
    fn collect_all_keeps_single_errors_unwrapped() {
        assert_eq!(collect_all::<u8>(vec![Ok(1), Ok(2)]).unwrap(), vec![1, 2]);
        assert!(matches!(
            collect_all::<u8>(vec![Ok(1), Err(target("a"))]),
            Err(DeployError::Target { .. })
        ));
        match collect_all::<u8>(vec![Err(target("a")), Ok(1), Err(target("b"))]) {
            Err(DeployError::Aggregate(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_message_names_each_target() {
        let message = DeployError::Aggregate(vec![target("web01"), target("web02")]).to_string();
        assert!(message.contains("[web01]"));
        assert!(message.contains("[web02]"));
    }
}
