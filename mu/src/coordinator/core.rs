//! UpdateCoordinator - registration surface and per-key sessions

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coordreg::{Registry, RegistryError, SessionId, TriState};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::CoordinationConfig;
use super::listener::UpdateListener;
use super::stats::{UpdateStats, UpdateStatsSnapshot};
use crate::error::CoordError;
use crate::pipeline::ArtifactPipeline;
use crate::session::{CoordinationSession, SessionConfig, SessionHandle, flag_path};

/// Keeps a set of resource keys' artifacts fresh in cooperation with every
/// other coordinator watching the same registry
///
/// Each registered key gets its own coordination session. The listener on
/// that session runs the elect-and-recompute protocol whenever the key's
/// flag leaves UPDATED.
pub struct UpdateCoordinator {
    name: String,
    registry: Arc<dyn Registry>,
    pipeline: Arc<dyn ArtifactPipeline>,
    config: CoordinationConfig,
    stats: Arc<UpdateStats>,
    sessions: Mutex<BTreeMap<String, CoordinationSession>>,
    registering: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UpdateCoordinator {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<dyn Registry>,
        pipeline: Arc<dyn ArtifactPipeline>,
        config: CoordinationConfig,
    ) -> Self {
        let name = name.into();
        debug!(%name, ?config, "UpdateCoordinator::new: called");
        Self {
            name,
            registry,
            pipeline,
            config,
            stats: Arc::new(UpdateStats::default()),
            sessions: Mutex::new(BTreeMap::new()),
            registering: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register every key, stopping at the first failure
    pub async fn register_resource_keys(&self, keys: &[String]) -> Result<(), CoordError> {
        debug!(coordinator = %self.name, ?keys, "UpdateCoordinator::register_resource_keys: called");
        for key in keys {
            self.register_resource_key(key).await?;
        }
        Ok(())
    }

    /// Start a session for `key`, force its flag to NEEDS_UPDATE and watch it
    ///
    /// Registering an already registered key does nothing. Connectivity and
    /// registration failures are returned to the caller. Only registrations of
    /// the same key wait on each other; the session map is locked just long
    /// enough to check for and insert the key.
    pub async fn register_resource_key(&self, key: &str) -> Result<(), CoordError> {
        debug!(coordinator = %self.name, %key, "UpdateCoordinator::register_resource_key: called");
        if key.is_empty() {
            return Err(CoordError::Registration {
                key: key.to_string(),
                source: RegistryError::Registration {
                    path: flag_path(key),
                    reason: "resource key must not be empty".to_string(),
                },
            });
        }

        let key_lock = self.registering.lock().await.entry(key.to_string()).or_default().clone();
        let _registering = key_lock.lock().await;
        if self.sessions.lock().await.contains_key(key) {
            debug!(coordinator = %self.name, %key, "Resource key already registered");
            return Ok(());
        }

        let session_config = SessionConfig::new(
            format!("{}/{}", self.name, key),
            self.config.connect_timeout(),
            self.config.lock_timeout(),
        );
        let mut session = CoordinationSession::new(self.registry.clone(), session_config);
        session.start().await?;

        let flag = flag_path(key);
        let listener = Arc::new(UpdateListener::new(
            key,
            self.config.lock_timeout(),
            self.pipeline.clone(),
            self.stats.clone(),
        ));

        let registered: Result<TriState, CoordError> = async {
            session.set_tri_state(&flag, TriState::NeedsUpdate).await?;
            session.register_tri_state(&flag, listener).await
        }
        .await;

        if let Err(e) = registered {
            warn!(coordinator = %self.name, %key, error = %e, "Failed to register resource key");
            if let Err(close_err) = session.close().await {
                debug!(%key, error = %close_err, "Close after failed registration also failed");
            }
            return Err(e);
        }

        info!(coordinator = %self.name, "table:{} registered for update coordination", key);
        self.sessions.lock().await.insert(key.to_string(), session);
        Ok(())
    }

    async fn handle(&self, key: &str) -> Result<SessionHandle, CoordError> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(key)
            .ok_or_else(|| CoordError::UnknownKey(key.to_string()))?
            .handle()
    }

    /// Force the key's flag to NEEDS_UPDATE
    ///
    /// No-op if it already is; only a real change notifies watchers.
    pub async fn invalidate(&self, key: &str) -> Result<(), CoordError> {
        debug!(coordinator = %self.name, %key, "UpdateCoordinator::invalidate: called");
        self.handle(key)
            .await?
            .set_tri_state(&flag_path(key), TriState::NeedsUpdate)
            .await
    }

    /// Current flag value for a registered key
    pub async fn state(&self, key: &str) -> Result<Option<TriState>, CoordError> {
        debug!(coordinator = %self.name, %key, "UpdateCoordinator::state: called");
        self.handle(key).await?.read_tri_state(&flag_path(key)).await
    }

    /// Poll until the key's flag reads `expected` or `timeout` passes
    pub async fn wait_for(&self, key: &str, expected: TriState, timeout: Duration) -> Result<bool, CoordError> {
        debug!(coordinator = %self.name, %key, %expected, ?timeout, "UpdateCoordinator::wait_for: called");
        let deadline = Instant::now() + timeout;
        loop {
            if self.state(key).await? == Some(expected) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Backend session serving `key`
    pub async fn session_id(&self, key: &str) -> Option<SessionId> {
        self.sessions.lock().await.get(key).and_then(|s| s.session_id())
    }

    /// Registered keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub fn stats(&self) -> UpdateStatsSnapshot {
        self.stats.snapshot()
    }

    /// Close every session; the registry releases their locks
    pub async fn shutdown(&self) -> Result<(), CoordError> {
        debug!(coordinator = %self.name, "UpdateCoordinator::shutdown: called");
        let mut sessions = std::mem::take(&mut *self.sessions.lock().await);

        let mut first_err = None;
        for (key, session) in sessions.iter_mut() {
            if let Err(e) = session.close().await {
                warn!(coordinator = %self.name, %key, error = %e, "Failed to close session");
                first_err.get_or_insert(e);
            }
        }

        info!(coordinator = %self.name, keys = sessions.len(), "Update coordinator shut down");
        first_err.map_or(Ok(()), Err)
    }
}
