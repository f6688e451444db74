//! TriStateListener - callback interface for flag and connection changes

use async_trait::async_trait;
use coordreg::{ConnectionState, TriState};
use tracing::{debug, warn};

use super::core::SessionHandle;
use crate::error::CoordError;

/// Receives watch notifications from a [`super::CoordinationSession`]
///
/// Called from the session's dispatcher task, one notification at a time.
/// A slow listener delays later notifications of the same session.
#[async_trait]
pub trait TriStateListener: Send + Sync {
    /// The watched flag took `value` (or was first observed at it)
    ///
    /// Errors are logged by the dispatcher and otherwise dropped.
    async fn state_has_changed(&self, session: &SessionHandle, flag: &str, value: TriState) -> Result<(), CoordError>;

    /// The session's connection changed state
    async fn connection_state_changed(&self, session: &SessionHandle, state: ConnectionState) {
        match state {
            ConnectionState::Lost => warn!(session = %session.name(), "Coordination session lost"),
            _ => debug!(session = %session.name(), %state, "Coordination connection state changed"),
        }
    }
}
