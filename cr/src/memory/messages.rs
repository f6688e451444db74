//! Message types for the MemoryRegistry actor

use tokio::sync::{mpsc, oneshot};

use crate::traits::RegistryResult;
use crate::types::{LockToken, RegistryEvent, SessionId, TriState};

/// Reply carrying a freshly opened session and its event stream
pub type ConnectReply = oneshot::Sender<RegistryResult<(SessionId, mpsc::UnboundedReceiver<RegistryEvent>)>>;

/// Internal requests to the MemoryRegistry task
#[derive(Debug)]
pub enum RegistryRequest {
    /// Open a session (parked while the registry is unreachable)
    Connect { reply: ConnectReply },

    /// End a session gracefully
    Close {
        session: SessionId,
        reply: oneshot::Sender<RegistryResult<()>>,
    },

    /// Simulate abnormal session death
    Expire {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },

    /// Simulate a partition between every client and the registry
    SetReachable { reachable: bool, reply: oneshot::Sender<()> },

    /// Create-if-absent and watch a flag
    RegisterFlag {
        session: SessionId,
        path: String,
        reply: oneshot::Sender<RegistryResult<TriState>>,
    },

    /// Read a flag
    ReadFlag {
        session: SessionId,
        path: String,
        reply: oneshot::Sender<RegistryResult<Option<TriState>>>,
    },

    /// Write a flag
    SetFlag {
        session: SessionId,
        path: String,
        value: TriState,
        reply: oneshot::Sender<RegistryResult<()>>,
    },

    /// Queue for a lock; the reply is sent when granted
    AcquireLock {
        token: LockToken,
        reply: oneshot::Sender<RegistryResult<Option<LockToken>>>,
    },

    /// Abandon a lock request whose caller timed out (internal)
    CancelLock { token: LockToken },

    /// Release a held lock
    ReleaseLock {
        token: LockToken,
        reply: oneshot::Sender<RegistryResult<()>>,
    },

    /// Every distinct value a flag has taken
    FlagHistory {
        path: String,
        reply: oneshot::Sender<Vec<TriState>>,
    },

    /// Get current metrics
    GetMetrics { reply: oneshot::Sender<RegistryMetrics> },

    /// Shutdown the registry
    Shutdown,
}

/// Registry metrics for observability
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryMetrics {
    pub live_sessions: usize,
    pub flags: usize,
    pub held_locks: usize,
    pub waiting_lockers: usize,
    /// Connects waiting for a partition to heal
    pub parked_connects: usize,
    pub notifications_sent: u64,
    pub lock_grants: u64,
    pub expired_sessions: u64,
}
