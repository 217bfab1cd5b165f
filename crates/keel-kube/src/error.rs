//! Error types for keel-kube

use keel_core::CoreError;
use keel_engine::EngineError;
use keel_repo::RepoError;
use thiserror::Error;

/// Result type for keel-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling a release
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// No history entry for the release; drives the install decision
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// A history entry with the same revision was written first
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseExists { name: String, namespace: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Render(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dependency(#[from] RepoError),

    /// A resource was rejected by the cluster
    #[error("failed to apply {resource}: {message}")]
    Apply { resource: String, message: String },

    /// Apply and readiness did not finish in time
    #[error("release '{release}' timed out after {timeout}")]
    Timeout { release: String, timeout: String },

    /// The cancellation token fired before the release finished
    #[error("Release of {name} has been cancelled.")]
    Cancelled { name: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A stage of an operation failed
    #[error("{operation} {release}: {source}")]
    Operation {
        operation: String,
        release: String,
        #[source]
        source: Box<KubeError>,
    },
}

impl KubeError {
    /// Attach the operation and release name to an error
    ///
    /// Cancellation passes through unchanged so callers can still tell it
    /// apart from a failure.
    pub fn during(self, operation: impl Into<String>, release: impl Into<String>) -> Self {
        match self {
            Self::Cancelled { .. } => self,
            other => Self::Operation {
                operation: operation.into(),
                release: release.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error (or the one it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Operation { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}
