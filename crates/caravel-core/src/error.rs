//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown kind: '{0}'")]
    UnknownKind(String),

    #[error("argument '{name}' has invalid value '{value}' (expected {expected})")]
    InvalidArgument {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("variable expansion failed: {0}")]
    VariableExpansion(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid name filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("definition file must end in .yaml, .yml or .json: {0}")]
    UnknownExtension(String),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
