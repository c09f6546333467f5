//! Error types for caravel-kube

use thiserror::Error;

/// Result type for cluster API operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to a cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be loaded or resolved
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// In-cluster / environment config inference failed
    #[error("cluster config error: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    /// Payload (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The kind carries no cluster resource (e.g. App)
    #[error("kind '{0}' has no API collection")]
    NoApiCollection(String),

    /// Request failed without an API status (used by fault injection too)
    #[error("request failed: {0}")]
    Request(String),
}

impl KubeError {
    /// Check for a Kubernetes 404 Not Found response
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }
}
