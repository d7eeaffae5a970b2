//! Error types for artifact sources.

use pinroll_core::{Cancelled, ConfigError};
use pinroll_flight::Cancellable;
use thiserror::Error;

/// Result type alias for artifact source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while listing, resolving, or fetching artifacts.
///
/// Payloads are strings so results can be shared between joined callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("object store error: {0}")]
    Store(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("artifact incomplete: {0}")]
    ArtifactIncomplete(String),

    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for SourceError {
    fn from(_: Cancelled) -> Self {
        SourceError::Cancelled
    }
}

impl From<ConfigError> for SourceError {
    fn from(e: ConfigError) -> Self {
        SourceError::InvalidConfig(e.to_string())
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

impl Cancellable for SourceError {
    fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}
