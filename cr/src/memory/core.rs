//! Main MemoryRegistry task implementation
//!
//! A single task owns every flag, lock and session, so all writes to one
//! flag are totally ordered and watchers see them in that order.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::RegistryConfig;
use super::handle::MemoryRegistryHandle;
use super::messages::{ConnectReply, RegistryMetrics, RegistryRequest};
use crate::error::RegistryError;
use crate::traits::RegistryResult;
use crate::types::{ConnectionState, LockToken, RegistryEvent, SessionId, TriState};

/// Live session bookkeeping
struct SessionEntry {
    events: mpsc::UnboundedSender<RegistryEvent>,
    watching: HashSet<String>,
}

/// One replicated flag
struct FlagEntry {
    value: TriState,
    history: Vec<TriState>,
    watchers: BTreeSet<SessionId>,
}

/// A queued lock request
struct LockWaiter {
    token: LockToken,
    reply: oneshot::Sender<RegistryResult<Option<LockToken>>>,
}

/// One named mutex
#[derive(Default)]
struct LockEntry {
    holder: Option<LockToken>,
    waiters: VecDeque<LockWaiter>,
}

/// Everything the registry task owns
struct RegistryState {
    history_limit: usize,
    reachable: bool,
    sessions: HashMap<SessionId, SessionEntry>,
    flags: HashMap<String, FlagEntry>,
    locks: HashMap<String, LockEntry>,
    pending_connects: Vec<ConnectReply>,
    metrics: RegistryMetrics,
}

impl RegistryState {
    fn new(config: &RegistryConfig) -> Self {
        Self {
            history_limit: config.history_limit.max(1),
            reachable: true,
            sessions: HashMap::new(),
            flags: HashMap::new(),
            locks: HashMap::new(),
            pending_connects: Vec::new(),
            metrics: RegistryMetrics::default(),
        }
    }

    /// Fail unless the session is alive and the registry reachable
    fn check_session(&self, session: &SessionId) -> RegistryResult<()> {
        // Session ids are never reused, so an absent id is an expired or closed session
        if !self.sessions.contains_key(session) {
            return Err(RegistryError::SessionExpired(session.clone()));
        }
        if !self.reachable {
            return Err(RegistryError::Unreachable("registry partitioned from session".to_string()));
        }
        Ok(())
    }

    fn open_session(&mut self, reply: ConnectReply) {
        let id = SessionId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(RegistryEvent::Connection(ConnectionState::Connected));

        // A caller that already timed out dropped its receiver; no session for it
        if reply.send(Ok((id.clone(), events_rx))).is_ok() {
            debug!(session = %id, "Session opened");
            self.sessions.insert(
                id,
                SessionEntry {
                    events: events_tx,
                    watching: HashSet::new(),
                },
            );
        } else {
            debug!(session = %id, "Connect caller gone, discarding session");
        }
    }

    fn notify(&mut self, path: &str, value: TriState) {
        let Some(flag) = self.flags.get(path) else {
            return;
        };
        for watcher in &flag.watchers {
            if let Some(entry) = self.sessions.get(watcher)
                && entry
                    .events
                    .send(RegistryEvent::FlagChanged {
                        path: path.to_string(),
                        value,
                    })
                    .is_ok()
            {
                self.metrics.notifications_sent += 1;
            }
        }
    }

    fn register_flag(&mut self, session: &SessionId, path: &str) -> RegistryResult<TriState> {
        self.check_session(session)?;
        if path.is_empty() {
            return Err(RegistryError::Registration {
                path: path.to_string(),
                reason: "flag path must not be empty".to_string(),
            });
        }

        let flag = self.flags.entry(path.to_string()).or_insert_with(|| {
            debug!(%path, "Creating flag at NEEDS_UPDATE");
            FlagEntry {
                value: TriState::NeedsUpdate,
                history: vec![TriState::NeedsUpdate],
                watchers: BTreeSet::new(),
            }
        });
        let current = flag.value;
        let newly_watching = flag.watchers.insert(session.clone());

        if newly_watching && let Some(entry) = self.sessions.get_mut(session) {
            entry.watching.insert(path.to_string());
            // Initial observation for the new watcher only
            if entry
                .events
                .send(RegistryEvent::FlagChanged {
                    path: path.to_string(),
                    value: current,
                })
                .is_ok()
            {
                self.metrics.notifications_sent += 1;
            }
        }

        Ok(current)
    }

    fn set_flag(&mut self, session: &SessionId, path: &str, value: TriState) -> RegistryResult<()> {
        self.check_session(session)?;
        let history_limit = self.history_limit;

        match self.flags.get_mut(path) {
            Some(flag) if flag.value == value => {
                debug!(%path, %value, "Flag unchanged, no notification");
                return Ok(());
            }
            Some(flag) => {
                if !TriState::can_transition(flag.value, value) {
                    debug!(%path, from = %flag.value, to = %value, "Out-of-machine flag write");
                }
                flag.value = value;
                if flag.history.len() >= history_limit {
                    flag.history.remove(0);
                }
                flag.history.push(value);
            }
            None => {
                debug!(%path, %value, "Creating flag on first write");
                self.flags.insert(
                    path.to_string(),
                    FlagEntry {
                        value,
                        history: vec![value],
                        watchers: BTreeSet::new(),
                    },
                );
            }
        }

        self.notify(path, value);
        Ok(())
    }

    fn acquire_lock(&mut self, token: LockToken, reply: oneshot::Sender<RegistryResult<Option<LockToken>>>) {
        if let Err(e) = self.check_session(&token.session) {
            let _ = reply.send(Err(e));
            return;
        }

        let path = token.path.clone();
        let lock = self.locks.entry(path.clone()).or_default();
        if lock.holder.is_some() {
            debug!(%path, session = %token.session, "Lock busy, queueing waiter");
            lock.waiters.push_back(LockWaiter { token, reply });
            return;
        }

        lock.holder = Some(token.clone());
        if reply.send(Ok(Some(token))).is_ok() {
            self.metrics.lock_grants += 1;
        } else {
            lock.holder = None;
            self.grant_next(&path);
        }
    }

    /// Hand a free lock to the first waiter that is still listening
    fn grant_next(&mut self, path: &str) {
        let Some(lock) = self.locks.get_mut(path) else {
            return;
        };
        if lock.holder.is_some() {
            return;
        }

        while let Some(waiter) = lock.waiters.pop_front() {
            let session = waiter.token.session.clone();
            if !self.sessions.contains_key(&session) {
                let _ = waiter.reply.send(Err(RegistryError::SessionExpired(session)));
                continue;
            }

            lock.holder = Some(waiter.token.clone());
            if waiter.reply.send(Ok(Some(waiter.token))).is_ok() {
                debug!(%path, %session, "Lock granted to waiter");
                self.metrics.lock_grants += 1;
                return;
            }
            lock.holder = None;
        }
    }

    fn release_lock(&mut self, token: &LockToken) -> RegistryResult<()> {
        self.check_session(&token.session)?;
        let lock = self.locks.get_mut(&token.path);
        match lock {
            Some(lock) if lock.holder.as_ref() == Some(token) => {
                lock.holder = None;
                debug!(path = %token.path, session = %token.session, "Lock released");
                self.grant_next(&token.path);
                Ok(())
            }
            _ => Err(RegistryError::LockNotHeld(token.path.clone())),
        }
    }

    fn cancel_lock(&mut self, token: &LockToken) {
        let Some(lock) = self.locks.get_mut(&token.path) else {
            return;
        };
        if lock.holder.as_ref() == Some(token) {
            // The grant raced the caller's timeout
            debug!(path = %token.path, session = %token.session, "Releasing grant of timed-out waiter");
            lock.holder = None;
            self.grant_next(&token.path);
        } else {
            lock.waiters.retain(|w| &w.token != token);
        }
    }

    /// Drop a session and everything it owns
    fn drop_session(&mut self, session: &SessionId, lost: bool) -> bool {
        let Some(entry) = self.sessions.remove(session) else {
            return false;
        };

        for path in &entry.watching {
            if let Some(flag) = self.flags.get_mut(path) {
                flag.watchers.remove(session);
            }
        }

        let mut freed = Vec::new();
        for (path, lock) in self.locks.iter_mut() {
            if lock.holder.as_ref().is_some_and(|h| &h.session == session) {
                lock.holder = None;
                freed.push(path.clone());
            }
            let (gone, kept): (Vec<_>, Vec<_>) = lock.waiters.drain(..).partition(|w| &w.token.session == session);
            lock.waiters = kept.into();
            for waiter in gone {
                let _ = waiter.reply.send(Err(RegistryError::SessionExpired(session.clone())));
            }
        }
        for path in freed {
            debug!(%path, %session, "Lock released with its session");
            self.grant_next(&path);
        }

        if lost {
            self.metrics.expired_sessions += 1;
            let _ = entry.events.send(RegistryEvent::Connection(ConnectionState::Lost));
        }
        true
    }

    /// Hold a connect until the partition heals, dropping callers that gave up
    fn park_connect(&mut self, reply: ConnectReply) {
        self.pending_connects.retain(|pending| !pending.is_closed());
        self.pending_connects.push(reply);
    }

    fn set_reachable(&mut self, reachable: bool) {
        if self.reachable == reachable {
            return;
        }
        self.reachable = reachable;

        let state = if reachable {
            ConnectionState::Reconnected
        } else {
            ConnectionState::Suspended
        };
        for entry in self.sessions.values() {
            let _ = entry.events.send(RegistryEvent::Connection(state));
        }

        if reachable {
            for reply in std::mem::take(&mut self.pending_connects) {
                self.open_session(reply);
            }
        }
    }

    fn snapshot_metrics(&self) -> RegistryMetrics {
        RegistryMetrics {
            live_sessions: self.sessions.len(),
            flags: self.flags.len(),
            held_locks: self.locks.values().filter(|l| l.holder.is_some()).count(),
            waiting_lockers: self.locks.values().map(|l| l.waiters.len()).sum(),
            parked_connects: self.pending_connects.iter().filter(|p| !p.is_closed()).count(),
            ..self.metrics.clone()
        }
    }
}

/// In-memory coordination registry
///
/// Stands in for a hierarchical, watchable, session-based coordination
/// service. Clients talk to it through [`MemoryRegistryHandle`].
pub struct MemoryRegistry {
    config: RegistryConfig,
    tx: mpsc::Sender<RegistryRequest>,
    rx: mpsc::Receiver<RegistryRequest>,
    lock_seq: Arc<AtomicU64>,
}

impl MemoryRegistry {
    /// Create a new MemoryRegistry with the given configuration
    pub fn new(config: RegistryConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self {
            config,
            tx,
            rx,
            lock_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a registry and run it on the current tokio runtime
    pub fn spawn(config: RegistryConfig) -> MemoryRegistryHandle {
        let registry = Self::new(config);
        let handle = registry.handle();
        tokio::spawn(registry.run());
        handle
    }

    /// Get a handle for opening sessions and driving simulations
    pub fn handle(&self) -> MemoryRegistryHandle {
        MemoryRegistryHandle::new(self.tx.clone(), self.lock_seq.clone())
    }

    /// Run the registry task
    ///
    /// This consumes the registry and runs until shutdown is requested.
    pub async fn run(mut self) {
        let mut state = RegistryState::new(&self.config);

        info!("MemoryRegistry started");

        while let Some(req) = self.rx.recv().await {
            match req {
                RegistryRequest::Connect { reply } => {
                    if state.reachable {
                        state.open_session(reply);
                    } else {
                        debug!("Registry unreachable, parking connect");
                        state.park_connect(reply);
                    }
                }

                RegistryRequest::Close { session, reply } => {
                    debug!(%session, "Closing session");
                    let result = if state.drop_session(&session, false) {
                        Ok(())
                    } else {
                        Err(RegistryError::SessionExpired(session))
                    };
                    let _ = reply.send(result);
                }

                RegistryRequest::Expire { session, reply } => {
                    warn!(%session, "Expiring session");
                    let _ = reply.send(state.drop_session(&session, true));
                }

                RegistryRequest::SetReachable { reachable, reply } => {
                    info!(reachable, "Registry reachability changed");
                    state.set_reachable(reachable);
                    let _ = reply.send(());
                }

                RegistryRequest::RegisterFlag { session, path, reply } => {
                    debug!(%session, %path, "Registering flag");
                    let _ = reply.send(state.register_flag(&session, &path));
                }

                RegistryRequest::ReadFlag { session, path, reply } => {
                    let result = state
                        .check_session(&session)
                        .map(|_| state.flags.get(&path).map(|f| f.value));
                    let _ = reply.send(result);
                }

                RegistryRequest::SetFlag {
                    session,
                    path,
                    value,
                    reply,
                } => {
                    debug!(%session, %path, %value, "Setting flag");
                    let _ = reply.send(state.set_flag(&session, &path, value));
                }

                RegistryRequest::AcquireLock { token, reply } => {
                    debug!(path = %token.path, session = %token.session, seq = token.seq, "Acquiring lock");
                    state.acquire_lock(token, reply);
                }

                RegistryRequest::CancelLock { token } => {
                    debug!(path = %token.path, session = %token.session, "Cancelling lock request");
                    state.cancel_lock(&token);
                }

                RegistryRequest::ReleaseLock { token, reply } => {
                    let _ = reply.send(state.release_lock(&token));
                }

                RegistryRequest::FlagHistory { path, reply } => {
                    let history = state.flags.get(&path).map(|f| f.history.clone()).unwrap_or_default();
                    let _ = reply.send(history);
                }

                RegistryRequest::GetMetrics { reply } => {
                    let _ = reply.send(state.snapshot_metrics());
                }

                RegistryRequest::Shutdown => {
                    info!("MemoryRegistry shutting down");
                    break;
                }
            }
        }

        info!("MemoryRegistry stopped");
    }
}
