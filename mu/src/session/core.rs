//! CoordinationSession and its dispatcher task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coordreg::{ConnectionState, Registry, RegistryEvent, RegistrySession, SessionId, TriState};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::guard::{LockGuard, StrandedLocks};
use super::listener::TriStateListener;
use crate::error::CoordError;

type Listeners = Arc<RwLock<HashMap<String, Arc<dyn TriStateListener>>>>;

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name used in log lines
    pub name: String,
    pub connect_timeout: Duration,
    pub lock_timeout: Duration,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, connect_timeout: Duration, lock_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            connect_timeout,
            lock_timeout,
        }
    }
}

/// Cloneable access to a started session
///
/// Handed to listeners so they can read and write flags and take locks.
#[derive(Clone)]
pub struct SessionHandle {
    name: String,
    lock_timeout: Duration,
    session: Arc<dyn RegistrySession>,
    stranded: StrandedLocks,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// Default timeout for [`SessionHandle::acquire_lock`] callers
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Unconditionally write a flag
    pub async fn set_tri_state(&self, flag: &str, value: TriState) -> Result<(), CoordError> {
        debug!(session = %self.name, %flag, %value, "SessionHandle::set_tri_state: called");
        Ok(self.session.set_flag(flag, value).await?)
    }

    /// Current value, `None` if the flag was never registered
    pub async fn read_tri_state(&self, flag: &str) -> Result<Option<TriState>, CoordError> {
        debug!(session = %self.name, %flag, "SessionHandle::read_tri_state: called");
        Ok(self.session.read_flag(flag).await?)
    }

    /// Whether the flag currently holds `expected`
    pub async fn check_tri_state(&self, flag: &str, expected: TriState) -> Result<bool, CoordError> {
        debug!(session = %self.name, %flag, %expected, "SessionHandle::check_tri_state: called");
        Ok(self.read_tri_state(flag).await? == Some(expected))
    }

    /// Try to take a lock; `None` on contention or timeout
    pub async fn acquire_lock(&self, lock: &str, timeout: Duration) -> Result<Option<LockGuard>, CoordError> {
        debug!(session = %self.name, %lock, ?timeout, "SessionHandle::acquire_lock: called");
        let token = self.session.acquire_lock(lock, timeout).await?;
        Ok(token.map(|token| LockGuard::new(self.session.clone(), self.stranded.clone(), token)))
    }
}

/// A process's connection to the coordination registry
pub struct CoordinationSession {
    config: SessionConfig,
    registry: Arc<dyn Registry>,
    handle: Option<SessionHandle>,
    listeners: Listeners,
    dispatcher: Option<JoinHandle<()>>,
}

impl CoordinationSession {
    pub fn new(registry: Arc<dyn Registry>, config: SessionConfig) -> Self {
        debug!(session = %config.name, "CoordinationSession::new: called");
        Self {
            config,
            registry,
            handle: None,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            dispatcher: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Connect to the registry and start dispatching notifications
    ///
    /// Waits at most the configured connect timeout. Calling it again on a
    /// started session does nothing.
    pub async fn start(&mut self) -> Result<(), CoordError> {
        debug!(session = %self.config.name, "CoordinationSession::start: called");
        if self.handle.is_some() {
            debug!(session = %self.config.name, "CoordinationSession::start: already started");
            return Ok(());
        }

        let connection = self
            .registry
            .connect(self.config.connect_timeout)
            .await
            .map_err(CoordError::Connectivity)?;

        let handle = SessionHandle {
            name: self.config.name.clone(),
            lock_timeout: self.config.lock_timeout,
            session: connection.session,
            stranded: StrandedLocks::default(),
        };
        info!(session = %self.config.name, id = %handle.id(), "Coordination session started");

        self.dispatcher = Some(tokio::spawn(dispatch(
            handle.clone(),
            self.listeners.clone(),
            connection.events,
        )));
        self.handle = Some(handle);
        Ok(())
    }

    /// Handle for flag and lock operations
    pub fn handle(&self) -> Result<SessionHandle, CoordError> {
        self.handle
            .clone()
            .ok_or_else(|| CoordError::NotStarted(self.config.name.clone()))
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.handle.as_ref().map(|h| h.id().clone())
    }

    /// Create the flag if absent and route its changes to `listener`
    ///
    /// The listener is in place before the backend registration, so the
    /// initial observation of the flag is never missed.
    pub async fn register_tri_state(&self, flag: &str, listener: Arc<dyn TriStateListener>) -> Result<TriState, CoordError> {
        debug!(session = %self.config.name, %flag, "CoordinationSession::register_tri_state: called");
        let handle = self.handle()?;

        self.listeners.write().await.insert(flag.to_string(), listener);
        match handle.session.register_flag(flag).await {
            Ok(value) => {
                debug!(session = %self.config.name, %flag, %value, "Registered tri-state flag");
                Ok(value)
            }
            Err(source) => {
                self.listeners.write().await.remove(flag);
                Err(CoordError::Registration {
                    key: flag.to_string(),
                    source,
                })
            }
        }
    }

    pub async fn set_tri_state(&self, flag: &str, value: TriState) -> Result<(), CoordError> {
        self.handle()?.set_tri_state(flag, value).await
    }

    pub async fn read_tri_state(&self, flag: &str) -> Result<Option<TriState>, CoordError> {
        self.handle()?.read_tri_state(flag).await
    }

    pub async fn check_tri_state(&self, flag: &str, expected: TriState) -> Result<bool, CoordError> {
        self.handle()?.check_tri_state(flag, expected).await
    }

    /// Try to take a lock with the configured lock timeout
    pub async fn acquire_lock(&self, lock: &str) -> Result<Option<LockGuard>, CoordError> {
        self.handle()?.acquire_lock(lock, self.config.lock_timeout).await
    }

    /// End the backend session
    ///
    /// The backend releases this session's locks and closes its event
    /// channel, which ends the dispatcher once queued notifications drain.
    pub async fn close(&mut self) -> Result<(), CoordError> {
        debug!(session = %self.config.name, "CoordinationSession::close: called");
        self.dispatcher.take();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.listeners.write().await.clear();

        match handle.session.close().await {
            Ok(()) => {
                info!(session = %self.config.name, "Coordination session closed");
                Ok(())
            }
            Err(e) if e.is_connectivity() => {
                debug!(session = %self.config.name, error = %e, "Session already gone at close");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Drain the session's events, one listener call at a time
async fn dispatch(handle: SessionHandle, listeners: Listeners, mut events: mpsc::UnboundedReceiver<RegistryEvent>) {
    debug!(session = %handle.name, "dispatch: started");

    while let Some(event) = events.recv().await {
        match event {
            RegistryEvent::FlagChanged { path, value } => {
                let listener = listeners.read().await.get(&path).cloned();
                let Some(listener) = listener else {
                    debug!(session = %handle.name, %path, %value, "No listener for flag");
                    continue;
                };
                if let Err(e) = listener.state_has_changed(&handle, &path, value).await {
                    warn!(session = %handle.name, flag = %path, %value, error = %e, "Listener failed to handle flag change");
                }
            }
            RegistryEvent::Connection(state) => {
                if state == ConnectionState::Reconnected {
                    handle.stranded.release_all(&handle.session).await;
                }
                let all: Vec<_> = listeners.read().await.values().cloned().collect();
                for listener in all {
                    listener.connection_state_changed(&handle, state).await;
                }
            }
        }
    }

    debug!(session = %handle.name, "dispatch: event channel closed");
}
