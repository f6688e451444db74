//! Error types for coordination and the artifact pipeline

use coordreg::RegistryError;
use thiserror::Error;

/// Failures of the artifact pipeline; always recoverable by the coordinator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source data for {key} unavailable: {reason}")]
    SourceUnavailable { key: String, reason: String },

    #[error("Failed to persist artifact for {key}: {reason}")]
    Persist { key: String, reason: String },
}

impl PipelineError {
    pub fn source_unavailable(key: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persist(key: &str, reason: impl ToString) -> Self {
        Self::Persist {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from coordination sessions and the update coordinator
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Coordination service connectivity lost: {0}")]
    Connectivity(RegistryError),

    #[error("Failed to register {key}: {source}")]
    Registration {
        key: String,
        #[source]
        source: RegistryError,
    },

    #[error("Coordination backend error: {0}")]
    Backend(RegistryError),

    #[error("Session {0} has not been started")]
    NotStarted(String),

    #[error("Resource key {0} is not registered")]
    UnknownKey(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<RegistryError> for CoordError {
    fn from(err: RegistryError) -> Self {
        if err.is_connectivity() {
            CoordError::Connectivity(err)
        } else {
            CoordError::Backend(err)
        }
    }
}

impl CoordError {
    /// Check if this error means the backend session is unusable
    pub fn is_connectivity(&self) -> bool {
        match self {
            CoordError::Connectivity(_) => true,
            CoordError::Registration { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }
}
