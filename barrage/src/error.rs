use barrage_core::ConfigError;
use std::sync::PoisonError;
use thiserror::Error;

/// Failure of a single request. Recorded against the run, never fatal to it.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Connection failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with something that is not a valid HTTP response.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to build HTTP client: {0}")]
    Client(String),

    /// Aggregator state can no longer be trusted.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl<T> From<PoisonError<T>> for HarnessError {
    fn from(_err: PoisonError<T>) -> Self {
        Self::Internal("Aggregator mutex is poisoned.".to_string())
    }
}
