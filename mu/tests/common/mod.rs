//! Shared helpers for metaupdate integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coordreg::{MemoryRegistry, MemoryRegistryHandle, RegistryConfig};
use metaupdate::{ArtifactPipeline, ArtifactSource, CoordinationConfig, PipelineError, TypeMetadata, UpdateCoordinator};
use tokio::sync::{Mutex, watch};

/// Generous wait for convergence in tests
pub const SETTLE: Duration = Duration::from_secs(5);

/// Pipeline that records every call and can be slowed, gated or made to fail
pub struct RecordingPipeline {
    fetches: AtomicUsize,
    publishes: AtomicUsize,
    fail_publishes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    published: Mutex<Vec<String>>,
    delay: Duration,
    gate: watch::Sender<bool>,
}

impl RecordingPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(Duration::ZERO, 0, true))
    }

    /// Every recompute sleeps for `delay` between fetch and publish
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(delay, 0, true))
    }

    /// The first `failures` publishes fail with a persist error
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self::build(Duration::ZERO, failures, true))
    }

    /// Fetches block until [`RecordingPipeline::open`] is called
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Duration::ZERO, 0, false))
    }

    fn build(delay: Duration, failures: usize, open: bool) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            fetches: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
            fail_publishes: AtomicUsize::new(failures),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            delay,
            gate,
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Successful publishes
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn published_keys(&self) -> Vec<String> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactPipeline for RecordingPipeline {
    async fn fetch_current(&self, key: &str) -> Result<ArtifactSource, PipelineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::source_unavailable(key, "gate dropped"));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(TypeMetadata::new().with("FIELD", key, "LcType"))
    }

    async fn publish(&self, key: &str, _source: &ArtifactSource) -> Result<(), PipelineError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.fail_publishes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_publishes.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::persist(key, "injected failure"));
        }

        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.published.lock().await.push(key.to_string());
        Ok(())
    }
}

pub fn registry() -> MemoryRegistryHandle {
    MemoryRegistry::spawn(RegistryConfig::default())
}

/// Short connect timeout, lock timeout long enough to outlast any test recompute
pub fn config() -> CoordinationConfig {
    CoordinationConfig::default().with_timeouts(Duration::from_millis(500), SETTLE)
}

pub fn coordinator(
    name: &str,
    registry: &MemoryRegistryHandle,
    pipeline: Arc<dyn ArtifactPipeline>,
) -> UpdateCoordinator {
    UpdateCoordinator::new(name, Arc::new(registry.clone()), pipeline, config())
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Poll the registry until `check` passes on its metrics or `SETTLE` runs out
pub async fn wait_for_metrics(
    registry: &MemoryRegistryHandle,
    check: impl Fn(&coordreg::RegistryMetrics) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        if let Ok(metrics) = registry.metrics().await
            && check(&metrics)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll `check` until it passes or `SETTLE` runs out
pub async fn wait_until(check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Let queued notifications drain
pub async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
