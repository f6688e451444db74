//! UpdateListener - elect-and-recompute for one resource key

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordreg::TriState;
use tracing::{debug, info, warn};

use super::stats::UpdateStats;
use crate::error::CoordError;
use crate::pipeline::ArtifactPipeline;
use crate::session::{LockGuard, SessionHandle, TriStateListener, lock_path};

/// Reacts to a key's flag leaving UPDATED by racing for its lock
pub struct UpdateListener {
    key: String,
    lock_timeout: Duration,
    pipeline: Arc<dyn ArtifactPipeline>,
    stats: Arc<UpdateStats>,
}

impl UpdateListener {
    pub fn new(key: &str, lock_timeout: Duration, pipeline: Arc<dyn ArtifactPipeline>, stats: Arc<UpdateStats>) -> Self {
        debug!(%key, ?lock_timeout, "UpdateListener::new: called");
        Self {
            key: key.to_string(),
            lock_timeout,
            pipeline,
            stats,
        }
    }

    /// Everything done while holding the lock
    async fn recompute(&self, session: &SessionHandle, guard: &mut LockGuard, flag: &str) -> Result<(), CoordError> {
        if !session.check_tri_state(flag, TriState::NeedsUpdate).await? {
            debug!("table:{} already handled by another process, skipping", self.key);
            self.stats.skip();
            return Ok(());
        }

        guard.mark_updating(flag).await?;
        info!("table:{} recomputing artifact", self.key);

        match self.fetch_and_publish().await {
            Ok(()) => {
                guard.mark_updated(flag).await?;
                self.stats.recompute();
                info!("table:{} artifact published", self.key);
            }
            Err(e) => {
                warn!("table:{} recompute failed, flag reverted: {}", self.key, e);
                self.stats.fail();
                guard.revert(flag).await?;
            }
        }
        Ok(())
    }

    async fn fetch_and_publish(&self) -> Result<(), CoordError> {
        let source = self.pipeline.fetch_current(&self.key).await?;
        self.pipeline.publish(&self.key, &source).await?;
        Ok(())
    }
}

#[async_trait]
impl TriStateListener for UpdateListener {
    async fn state_has_changed(&self, session: &SessionHandle, flag: &str, value: TriState) -> Result<(), CoordError> {
        debug!("table:{} state changed to {}", self.key, value);
        if value == TriState::Updated {
            return Ok(());
        }
        self.stats.trigger();

        let mut guard = match session.acquire_lock(&lock_path(&self.key), self.lock_timeout).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!("table:{} lock held elsewhere, backing off", self.key);
                self.stats.contended();
                return Ok(());
            }
            Err(e) => {
                self.stats.abandon();
                return Err(e);
            }
        };

        let result = self.recompute(session, &mut guard, flag).await;
        if let Err(e) = guard.release().await {
            debug!("table:{} lock release failed: {}", self.key, e);
        }

        if result.is_err() {
            self.stats.abandon();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::MockPipeline;
    use crate::session::{CoordinationSession, SessionConfig, flag_path};
    use coordreg::{MemoryRegistry, RegistryConfig};

    const WAIT: Duration = Duration::from_secs(1);

    async fn session(registry: &coordreg::MemoryRegistryHandle) -> CoordinationSession {
        let mut session = CoordinationSession::new(Arc::new(registry.clone()), SessionConfig::new("test", WAIT, WAIT));
        session.start().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_updated_is_ignored() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let session = session(&registry).await;
        let pipeline = Arc::new(MockPipeline::new(0));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", WAIT, pipeline.clone(), stats.clone());

        listener
            .state_has_changed(&session.handle().unwrap(), &flag_path("tableA"), TriState::Updated)
            .await
            .unwrap();
        assert_eq!(stats.snapshot().triggers, 0);
        assert_eq!(pipeline.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_recomputes_when_flag_needs_update() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let session = session(&registry).await;
        let handle = session.handle().unwrap();
        let flag = flag_path("tableA");
        handle.set_tri_state(&flag, TriState::NeedsUpdate).await.unwrap();

        let pipeline = Arc::new(MockPipeline::new(0));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", WAIT, pipeline.clone(), stats.clone());
        listener.state_has_changed(&handle, &flag, TriState::NeedsUpdate).await.unwrap();

        assert_eq!(pipeline.publish_count(), 1);
        assert_eq!(handle.read_tri_state(&flag).await.unwrap(), Some(TriState::Updated));
        assert_eq!(stats.snapshot().recomputed, 1);
        assert_eq!(registry.metrics().await.unwrap().held_locks, 0);
    }

    #[tokio::test]
    async fn test_failed_publish_reverts_flag() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let session = session(&registry).await;
        let handle = session.handle().unwrap();
        let flag = flag_path("tableA");
        handle.set_tri_state(&flag, TriState::NeedsUpdate).await.unwrap();

        let pipeline = Arc::new(MockPipeline::new(1));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", WAIT, pipeline.clone(), stats.clone());
        listener.state_has_changed(&handle, &flag, TriState::NeedsUpdate).await.unwrap();

        assert_eq!(handle.read_tri_state(&flag).await.unwrap(), Some(TriState::NeedsUpdate));
        assert_eq!(
            registry.flag_history(&flag).await.unwrap(),
            vec![TriState::NeedsUpdate, TriState::Updating, TriState::NeedsUpdate]
        );
        assert_eq!(stats.snapshot().failed, 1);
        assert_eq!(registry.metrics().await.unwrap().held_locks, 0);
    }

    #[tokio::test]
    async fn test_skips_when_flag_already_advanced() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let session = session(&registry).await;
        let handle = session.handle().unwrap();
        let flag = flag_path("tableA");
        handle.set_tri_state(&flag, TriState::NeedsUpdate).await.unwrap();
        handle.set_tri_state(&flag, TriState::Updating).await.unwrap();
        handle.set_tri_state(&flag, TriState::Updated).await.unwrap();

        let pipeline = Arc::new(MockPipeline::new(0));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", WAIT, pipeline.clone(), stats.clone());
        listener.state_has_changed(&handle, &flag, TriState::NeedsUpdate).await.unwrap();

        assert_eq!(pipeline.fetch_count(), 0);
        assert_eq!(stats.snapshot().skipped, 1);
    }

    #[tokio::test]
    async fn test_contention_backs_off_silently() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let holder = session(&registry).await;
        let _held = holder.acquire_lock(&lock_path("tableA")).await.unwrap().unwrap();

        let contender = session(&registry).await;
        let pipeline = Arc::new(MockPipeline::new(0));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", Duration::from_millis(50), pipeline.clone(), stats.clone());
        listener
            .state_has_changed(&contender.handle().unwrap(), &flag_path("tableA"), TriState::NeedsUpdate)
            .await
            .unwrap();

        assert_eq!(stats.snapshot().lock_contended, 1);
        assert_eq!(pipeline.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_session_abandons_attempt() {
        let registry = MemoryRegistry::spawn(RegistryConfig::default());
        let session = session(&registry).await;
        registry.expire_session(&session.session_id().unwrap()).await.unwrap();

        let pipeline = Arc::new(MockPipeline::new(0));
        let stats = Arc::new(UpdateStats::default());
        let listener = UpdateListener::new("tableA", WAIT, pipeline, stats.clone());
        let result = listener
            .state_has_changed(&session.handle().unwrap(), &flag_path("tableA"), TriState::NeedsUpdate)
            .await;

        assert!(result.unwrap_err().is_connectivity());
        assert_eq!(stats.snapshot().abandoned, 1);
    }
}
