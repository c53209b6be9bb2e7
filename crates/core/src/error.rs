//! Error types for the TSpec engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the TSpec error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("Circular template dependency detected: {}", path.display())]
    CircularTemplate { path: PathBuf },

    #[error("Data source error in {}: {reason}", path.display())]
    DataSource { path: PathBuf, reason: String },

    #[error("Unknown assertion operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("No runner registered for protocol: {0}")]
    UnregisteredProtocol(String),

    #[error("Built-in protocol cannot be unregistered: {0}")]
    BuiltinProtocol(String),

    #[error("Unknown lifecycle action: {0}")]
    UnknownAction(String),

    #[error("Invalid lifecycle action: {0}")]
    InvalidAction(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("Test case has no protocol: {0}")]
    MissingProtocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build a load error for a path
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a data source error for a path
    pub fn data_source(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::DataSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an invalid expression error
    pub fn expression(expression: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidExpression {
            expression: expression.into(),
            reason: reason.to_string(),
        }
    }
}
