//! Declarative config transform capability.

/// Applies a transform document to a config document, returning the
/// transformed text. Implementations must not touch the filesystem.
pub trait ConfigTransform: Send + Sync {
    fn apply(&self, document: &str, transform: &str) -> Result<String, TransformError>;
}

impl<F> ConfigTransform for F
where
    F: Fn(&str, &str) -> Result<String, TransformError> + Send + Sync,
{
    fn apply(&self, document: &str, transform: &str) -> Result<String, TransformError> {
        self(document, transform)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("config transforms are not available in this build")]
    Unavailable,

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("transform failed: {0}")]
    Failed(String),
}

/// Transform used when no engine is wired in; any configured pair fails the
/// run rather than deploying untransformed configs.
pub struct UnavailableTransform;

impl ConfigTransform for UnavailableTransform {
    fn apply(&self, _document: &str, _transform: &str) -> Result<String, TransformError> {
        Err(TransformError::Unavailable)
    }
}
