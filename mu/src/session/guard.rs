//! LockGuard - scoped ownership of a registry lock

use std::sync::Arc;

use coordreg::{LockToken, RegistryError, RegistrySession, TriState};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CoordError;

/// Locks whose release could not reach the registry
///
/// The registry only frees a lock when its holder releases it or its session
/// ends. A session that rides out a partition keeps its locks, so a release
/// lost to the partition is parked here and retried on reconnect.
#[derive(Clone, Default)]
pub(crate) struct StrandedLocks(Arc<Mutex<Vec<LockToken>>>);

impl StrandedLocks {
    async fn push(&self, token: LockToken) {
        self.0.lock().await.push(token);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.0.lock().await.len()
    }

    /// Retry every parked release; tokens that still cannot reach the registry stay parked
    pub(crate) async fn release_all(&self, session: &Arc<dyn RegistrySession>) {
        let tokens = std::mem::take(&mut *self.0.lock().await);
        if tokens.is_empty() {
            return;
        }
        debug!(count = tokens.len(), "StrandedLocks::release_all: called");

        for token in tokens {
            let path = token.path.clone();
            match release_token(session, self, token).await {
                Ok(()) => info!(%path, "Released lock stranded by a partition"),
                Err(RegistryError::Unreachable(_)) => {}
                Err(e) => debug!(%path, error = %e, "Stranded lock already gone"),
            }
        }
    }
}

/// Release a lock, parking the token if the registry is unreachable
async fn release_token(
    session: &Arc<dyn RegistrySession>,
    stranded: &StrandedLocks,
    token: LockToken,
) -> Result<(), RegistryError> {
    match session.release_lock(&token).await {
        Err(RegistryError::Unreachable(reason)) => {
            warn!(path = %token.path, %reason, "Lock release unreachable, retrying on reconnect");
            stranded.push(token).await;
            Err(RegistryError::Unreachable(reason))
        }
        other => other,
    }
}

/// A held registry lock
///
/// The flag writes that are only legal under the lock live here. Call
/// [`LockGuard::release`] when done; a guard dropped while still holding the
/// lock schedules the release on the current tokio runtime.
pub struct LockGuard {
    session: Arc<dyn RegistrySession>,
    stranded: StrandedLocks,
    token: Option<LockToken>,
    last_write: Option<(String, TriState)>,
}

impl LockGuard {
    pub(crate) fn new(session: Arc<dyn RegistrySession>, stranded: StrandedLocks, token: LockToken) -> Self {
        debug!(path = %token.path, seq = token.seq, "LockGuard::new: called");
        Self {
            session,
            stranded,
            token: Some(token),
            last_write: None,
        }
    }

    /// Path of the held lock
    pub fn path(&self) -> &str {
        self.token.as_ref().map(|t| t.path.as_str()).unwrap_or_default()
    }

    async fn write(&mut self, flag: &str, value: TriState) -> Result<(), CoordError> {
        if self.token.is_none() {
            return Err(CoordError::InvariantViolation(format!(
                "write of {} to {} without holding a lock",
                value, flag
            )));
        }
        self.session.set_flag(flag, value).await?;
        self.last_write = Some((flag.to_string(), value));
        Ok(())
    }

    /// NEEDS_UPDATE -> UPDATING
    pub async fn mark_updating(&mut self, flag: &str) -> Result<(), CoordError> {
        debug!(lock = %self.path(), %flag, "LockGuard::mark_updating: called");
        self.write(flag, TriState::Updating).await
    }

    /// UPDATING -> UPDATED; requires this guard to have written UPDATING
    pub async fn mark_updated(&mut self, flag: &str) -> Result<(), CoordError> {
        debug!(lock = %self.path(), %flag, "LockGuard::mark_updated: called");
        match &self.last_write {
            Some((last_flag, TriState::Updating)) if last_flag == flag => {}
            other => {
                return Err(CoordError::InvariantViolation(format!(
                    "{} marked UPDATED under {} without a preceding UPDATING write (last write: {:?})",
                    flag,
                    self.path(),
                    other
                )));
            }
        }
        self.write(flag, TriState::Updated).await
    }

    /// UPDATING -> NEEDS_UPDATE after a failed recompute
    pub async fn revert(&mut self, flag: &str) -> Result<(), CoordError> {
        debug!(lock = %self.path(), %flag, "LockGuard::revert: called");
        self.write(flag, TriState::NeedsUpdate).await
    }

    /// Release the lock
    ///
    /// If the registry is unreachable the release is retried once the session
    /// reconnects, and the connectivity error is still returned.
    pub async fn release(mut self) -> Result<(), CoordError> {
        debug!(lock = %self.path(), "LockGuard::release: called");
        match self.token.take() {
            Some(token) => Ok(release_token(&self.session, &self.stranded, token).await?),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(path = %token.path, "LockGuard dropped while held, scheduling release");
                let session = self.session.clone();
                let stranded = self.stranded.clone();
                runtime.spawn(async move {
                    if let Err(e) = release_token(&session, &stranded, token.clone()).await {
                        warn!(path = %token.path, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(path = %token.path, "LockGuard dropped outside a runtime; lock stays with the session");
            }
        }
    }
}
