//! MemoryRegistryHandle - client interface to the in-memory registry

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{RegistryMetrics, RegistryRequest};
use crate::error::RegistryError;
use crate::traits::{Connection, Registry, RegistryResult, RegistrySession};
use crate::types::{LockToken, SessionId, TriState};

/// Handle for opening sessions against a [`super::MemoryRegistry`]
///
/// Cloneable. Besides the [`Registry`] interface it exposes the controls a
/// simulation needs: session expiry, partitions, flag history and metrics.
#[derive(Clone)]
pub struct MemoryRegistryHandle {
    tx: mpsc::Sender<RegistryRequest>,
    lock_seq: Arc<AtomicU64>,
}

impl MemoryRegistryHandle {
    pub(crate) fn new(tx: mpsc::Sender<RegistryRequest>, lock_seq: Arc<AtomicU64>) -> Self {
        debug!("MemoryRegistryHandle::new: called");
        Self { tx, lock_seq }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RegistryRequest) -> RegistryResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Kill a session as if its process crashed
    ///
    /// Returns false if the session was not alive.
    pub async fn expire_session(&self, session: &SessionId) -> RegistryResult<bool> {
        debug!(%session, "MemoryRegistryHandle::expire_session: called");
        self.request(|reply| RegistryRequest::Expire {
            session: session.clone(),
            reply,
        })
        .await
    }

    /// Partition (false) or heal (true) every client's link to the registry
    pub async fn set_reachable(&self, reachable: bool) -> RegistryResult<()> {
        debug!(reachable, "MemoryRegistryHandle::set_reachable: called");
        self.request(|reply| RegistryRequest::SetReachable { reachable, reply })
            .await
    }

    /// Every distinct value the flag has taken, oldest first
    pub async fn flag_history(&self, path: &str) -> RegistryResult<Vec<TriState>> {
        debug!(%path, "MemoryRegistryHandle::flag_history: called");
        self.request(|reply| RegistryRequest::FlagHistory {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Get current registry metrics
    pub async fn metrics(&self) -> RegistryResult<RegistryMetrics> {
        debug!("MemoryRegistryHandle::metrics: called");
        self.request(|reply| RegistryRequest::GetMetrics { reply }).await
    }

    /// Request shutdown of the registry task
    pub async fn shutdown(&self) -> RegistryResult<()> {
        debug!("MemoryRegistryHandle::shutdown: called");
        self.tx
            .send(RegistryRequest::Shutdown)
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }
}

#[async_trait]
impl Registry for MemoryRegistryHandle {
    async fn connect(&self, timeout: Duration) -> RegistryResult<Connection> {
        debug!(?timeout, "MemoryRegistryHandle::connect: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryRequest::Connect { reply: reply_tx })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        let (id, events) = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(RegistryError::ChannelClosed),
            Err(_) => {
                debug!(?timeout, "MemoryRegistryHandle::connect: timed out");
                return Err(RegistryError::ConnectTimeout(timeout));
            }
        };

        debug!(session = %id, "MemoryRegistryHandle::connect: connected");
        let session = MemorySession {
            id,
            tx: self.tx.clone(),
            lock_seq: self.lock_seq.clone(),
        };
        Ok(Connection {
            session: Arc::new(session),
            events,
        })
    }
}

/// A session against the in-memory registry
pub struct MemorySession {
    id: SessionId,
    tx: mpsc::Sender<RegistryRequest>,
    lock_seq: Arc<AtomicU64>,
}

impl MemorySession {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<RegistryResult<T>>) -> RegistryRequest,
    ) -> RegistryResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }
}

#[async_trait]
impl RegistrySession for MemorySession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn register_flag(&self, path: &str) -> RegistryResult<TriState> {
        debug!(session = %self.id, %path, "MemorySession::register_flag: called");
        self.request(|reply| RegistryRequest::RegisterFlag {
            session: self.id.clone(),
            path: path.to_string(),
            reply,
        })
        .await
    }

    async fn read_flag(&self, path: &str) -> RegistryResult<Option<TriState>> {
        debug!(session = %self.id, %path, "MemorySession::read_flag: called");
        self.request(|reply| RegistryRequest::ReadFlag {
            session: self.id.clone(),
            path: path.to_string(),
            reply,
        })
        .await
    }

    async fn set_flag(&self, path: &str, value: TriState) -> RegistryResult<()> {
        debug!(session = %self.id, %path, %value, "MemorySession::set_flag: called");
        self.request(|reply| RegistryRequest::SetFlag {
            session: self.id.clone(),
            path: path.to_string(),
            value,
            reply,
        })
        .await
    }

    async fn acquire_lock(&self, path: &str, timeout: Duration) -> RegistryResult<Option<LockToken>> {
        debug!(session = %self.id, %path, ?timeout, "MemorySession::acquire_lock: called");
        let token = LockToken {
            path: path.to_string(),
            session: self.id.clone(),
            seq: self.lock_seq.fetch_add(1, Ordering::SeqCst),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryRequest::AcquireLock {
                token: token.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RegistryError::ChannelClosed),
            Err(_) => {
                debug!(%path, "MemorySession::acquire_lock: timed out");
                // The registry may have granted just before the timeout; cancel releases that grant
                self.tx
                    .send(RegistryRequest::CancelLock { token })
                    .await
                    .map_err(|_| RegistryError::ChannelClosed)?;
                Ok(None)
            }
        }
    }

    async fn release_lock(&self, token: &LockToken) -> RegistryResult<()> {
        debug!(session = %self.id, path = %token.path, "MemorySession::release_lock: called");
        self.request(|reply| RegistryRequest::ReleaseLock {
            token: token.clone(),
            reply,
        })
        .await
    }

    async fn close(&self) -> RegistryResult<()> {
        debug!(session = %self.id, "MemorySession::close: called");
        self.request(|reply| RegistryRequest::Close {
            session: self.id.clone(),
            reply,
        })
        .await
    }
}
