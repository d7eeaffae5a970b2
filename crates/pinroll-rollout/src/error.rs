//! Error types for rollouts.

use pinroll_core::Cancelled;
use pinroll_flight::Cancellable;
use pinroll_source::SourceError;
use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors raised while rolling a version marker out to services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RolloutError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("service not found: {cluster}/{service}")]
    ServiceNotFound { cluster: String, service: String },

    #[error("describe failed: {0}")]
    Describe(String),

    #[error("definition registration failed: {0}")]
    Registration(String),

    #[error("definition deregistration failed: {0}")]
    Deregistration(String),

    #[error("service update failed: {0}")]
    ServiceUpdate(String),

    #[error("artifact source error: {0}")]
    Source(SourceError),

    #[error("operation cancelled")]
    Cancelled,
}

impl RolloutError {
    /// Whether the target itself is missing (cluster or service).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RolloutError::ClusterNotFound(_) | RolloutError::ServiceNotFound { .. }
        )
    }
}

impl From<SourceError> for RolloutError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Cancelled => RolloutError::Cancelled,
            other => RolloutError::Source(other),
        }
    }
}

impl From<Cancelled> for RolloutError {
    fn from(_: Cancelled) -> Self {
        RolloutError::Cancelled
    }
}

impl Cancellable for RolloutError {
    fn is_cancelled(&self) -> bool {
        matches!(self, RolloutError::Cancelled)
    }
}
