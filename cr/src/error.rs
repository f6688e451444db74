//! Registry error types

use std::time::Duration;
use thiserror::Error;

use crate::types::SessionId;

/// Errors surfaced by a registry backend
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out after {0:?} connecting to registry")]
    ConnectTimeout(Duration),

    #[error("Session {0} expired")]
    SessionExpired(SessionId),

    #[error("Failed to register {path}: {reason}")]
    Registration { path: String, reason: String },

    #[error("Lock {0} is not held by this acquisition")]
    LockNotHeld(String),

    #[error("Registry channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Check if this error means the session lost contact with the backend
    pub fn is_connectivity(&self) -> bool {
        match self {
            RegistryError::Unreachable(_) => true,
            RegistryError::ConnectTimeout(_) => true,
            RegistryError::SessionExpired(_) => true,
            RegistryError::ChannelClosed => true,
            RegistryError::Registration { .. } => false,
            RegistryError::LockNotHeld(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_connectivity() {
        assert!(RegistryError::Unreachable("partition".to_string()).is_connectivity());
        assert!(RegistryError::ConnectTimeout(Duration::from_secs(30)).is_connectivity());
        assert!(RegistryError::SessionExpired(SessionId("s-1".to_string())).is_connectivity());
        assert!(RegistryError::ChannelClosed.is_connectivity());

        assert!(
            !RegistryError::Registration {
                path: "tableA:needsUpdate".to_string(),
                reason: "bad path".to_string(),
            }
            .is_connectivity()
        );
        assert!(!RegistryError::LockNotHeld("tableA/lock".to_string()).is_connectivity());
    }

    #[test]
    fn test_error_messages() {
        let err = RegistryError::SessionExpired(SessionId("s-42".to_string()));
        assert_eq!(err.to_string(), "Session s-42 expired");

        let err = RegistryError::LockNotHeld("tableA/lock".to_string());
        assert!(err.to_string().contains("tableA/lock"));
    }
}
