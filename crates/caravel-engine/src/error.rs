//! Error types for caravel-engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] caravel_core::CoreError),

    #[error(transparent)]
    Kube(#[from] caravel_kube::KubeError),

    #[error("component '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("circular dependency: '{from}' already depends on '{to}'")]
    CircularDependency { from: String, to: String },

    #[error("circular dependency through task '{0}'")]
    CircularTaskDependency(String),

    #[error("run failed on cluster '{cluster}': {}", .failed.join(", "))]
    RunFailed {
        cluster: String,
        failed: Vec<String>,
    },

    #[error("scheduler channel closed unexpectedly")]
    ChannelClosed,

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
