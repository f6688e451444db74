//! Backend interface: the coordination service as a black box

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RegistryError;
use crate::types::{LockToken, RegistryEvent, SessionId, TriState};

/// Result alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A live session plus the channel its watch notifications arrive on
pub struct Connection {
    pub session: Arc<dyn RegistrySession>,
    pub events: mpsc::UnboundedReceiver<RegistryEvent>,
}

/// Entry point to a coordination backend
#[async_trait]
pub trait Registry: Send + Sync {
    /// Open a new session, waiting at most `timeout` for the backend
    async fn connect(&self, timeout: Duration) -> RegistryResult<Connection>;
}

/// One session against the backend
///
/// Locks and watches belong to the session: when the session ends, cleanly
/// or not, the backend releases its locks and drops its watches.
#[async_trait]
pub trait RegistrySession: Send + Sync {
    /// This session's identity
    fn id(&self) -> &SessionId;

    /// Create the flag at `NeedsUpdate` if absent and watch it
    ///
    /// The current value is returned and also delivered as the first
    /// `FlagChanged` event for this path.
    async fn register_flag(&self, path: &str) -> RegistryResult<TriState>;

    /// Current value, or `None` if the flag was never created
    async fn read_flag(&self, path: &str) -> RegistryResult<Option<TriState>>;

    /// Unconditionally write a new value; unchanged writes notify nobody
    async fn set_flag(&self, path: &str, value: TriState) -> RegistryResult<()>;

    /// Try to take the named lock, giving up after `timeout`
    async fn acquire_lock(&self, path: &str, timeout: Duration) -> RegistryResult<Option<LockToken>>;

    /// Release exactly the acquisition named by `token`
    async fn release_lock(&self, token: &LockToken) -> RegistryResult<()>;

    /// End the session gracefully
    async fn close(&self) -> RegistryResult<()>;
}
