//! Error types for the fleetsync agent

use thiserror::Error;

/// Main error type for the fleetsync agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Registry was modified concurrently (loaded revision {loaded}, found {found})")]
    RegistryConflict { loaded: u64, found: u64 },

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
