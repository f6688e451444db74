//! In-process fleet simulation
//!
//! Runs several [`UpdateCoordinator`]s against one [`MemoryRegistry`],
//! drives invalidations through them and reports how each table's flag
//! moved and what got published.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordreg::{MemoryRegistry, MemoryRegistryHandle, RegistryConfig, RegistryMetrics, TriState};
use eyre::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, validate_tables};
use crate::coordinator::{UpdateCoordinator, UpdateStatsSnapshot};
use crate::error::PipelineError;
use crate::pipeline::{
    ArtifactPipeline, ArtifactSource, FileArtifactStore, FileMetadataSource, MetadataSource, StaticMetadataSource,
    TypeMetadataPipeline,
};
use crate::session::flag_path;

/// What to simulate
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub nodes: usize,
    pub tables: Vec<String>,
    pub invalidations: usize,
    /// Fail the first publish of every table
    pub fail_first: bool,
    /// How long to wait for a table to settle at UPDATED
    pub settle_timeout: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            nodes: 3,
            tables: Vec::new(),
            invalidations: 0,
            fail_first: false,
            settle_timeout: Duration::from_secs(30),
        }
    }
}

/// Last published artifact of a table
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub path: PathBuf,
    pub written_at: DateTime<Utc>,
    pub fields: usize,
}

/// Outcome for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub final_state: Option<TriState>,
    pub history: Vec<TriState>,
    pub artifact: Option<ArtifactSummary>,
}

/// Counters of one simulated node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub stats: UpdateStatsSnapshot,
}

/// Everything a simulation run observed
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub nodes: usize,
    pub invalidations: usize,
    pub converged: bool,
    pub tables: Vec<TableReport>,
    pub node_stats: Vec<NodeReport>,
    pub totals: UpdateStatsSnapshot,
    pub registry: RegistryMetrics,
}

/// Fails the first publish of each key, then delegates
pub struct FailFirstPublish {
    inner: Arc<dyn ArtifactPipeline>,
    failed: Mutex<HashSet<String>>,
}

impl FailFirstPublish {
    pub fn new(inner: Arc<dyn ArtifactPipeline>) -> Self {
        Self {
            inner,
            failed: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl ArtifactPipeline for FailFirstPublish {
    async fn fetch_current(&self, key: &str) -> Result<ArtifactSource, PipelineError> {
        self.inner.fetch_current(key).await
    }

    async fn publish(&self, key: &str, source: &ArtifactSource) -> Result<(), PipelineError> {
        if self.failed.lock().await.insert(key.to_string()) {
            debug!(%key, "FailFirstPublish: injecting failure");
            return Err(PipelineError::persist(key, "injected first-publish failure"));
        }
        self.inner.publish(key, source).await
    }
}

/// Build the artifact pipeline described by `config`
pub fn build_pipeline(config: &Config, tables: &[String]) -> TypeMetadataPipeline {
    let source: Arc<dyn MetadataSource> = match &config.metadata.source {
        Some(path) => Arc::new(FileMetadataSource::new(path)),
        None => Arc::new(StaticMetadataSource::sample(tables)),
    };
    TypeMetadataPipeline::new(source, FileArtifactStore::new(&config.storage.artifact_dir))
}

/// Run a simulation to completion
pub async fn run_simulation(config: &Config, options: SimulationOptions) -> Result<SimulationReport> {
    debug!(?options, "run_simulation: called");
    if options.nodes == 0 {
        return Err(eyre::eyre!("Simulation needs at least one node"));
    }
    let tables = if options.tables.is_empty() {
        config.tables.clone()
    } else {
        options.tables.clone()
    };
    validate_tables(&tables).context("Invalid simulation tables")?;

    let registry = MemoryRegistry::spawn(RegistryConfig {
        channel_buffer: config.coordination.channel_buffer,
        ..RegistryConfig::default()
    });

    let type_pipeline = build_pipeline(config, &tables);
    let store = type_pipeline.store().clone();
    let mut pipeline: Arc<dyn ArtifactPipeline> = Arc::new(type_pipeline);
    if options.fail_first {
        pipeline = Arc::new(FailFirstPublish::new(pipeline));
    }

    let coordinators: Vec<UpdateCoordinator> = (0..options.nodes)
        .map(|i| {
            UpdateCoordinator::new(
                format!("node-{}", i),
                Arc::new(registry.clone()),
                pipeline.clone(),
                config.coordination.clone(),
            )
        })
        .collect();

    info!(nodes = options.nodes, ?tables, "Starting simulation");
    futures::future::try_join_all(coordinators.iter().map(|c| c.register_resource_keys(&tables)))
        .await
        .context("Failed to register resource keys")?;

    let mut converged = settle(&coordinators[0], &tables, options.settle_timeout).await?;

    for i in 0..options.invalidations {
        let node = &coordinators[i % coordinators.len()];
        let table = &tables[i % tables.len()];
        info!(node = %node.name(), %table, "Invalidating");
        node.invalidate(table)
            .await
            .context(format!("Failed to invalidate {}", table))?;
        converged &= settle(node, std::slice::from_ref(table), options.settle_timeout).await?;
    }

    let report = collect_report(&registry, &store, &coordinators, &tables, &options, converged).await;

    for coordinator in &coordinators {
        if let Err(e) = coordinator.shutdown().await {
            warn!(node = %coordinator.name(), error = %e, "Coordinator shutdown failed");
        }
    }
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Registry shutdown failed");
    }

    let report = report?;
    info!(converged = report.converged, "Simulation finished");
    Ok(report)
}

/// Wait for every table to read UPDATED
async fn settle(coordinator: &UpdateCoordinator, tables: &[String], timeout: Duration) -> Result<bool> {
    let mut all = true;
    for table in tables {
        let updated = coordinator
            .wait_for(table, TriState::Updated, timeout)
            .await
            .context(format!("Failed to read state of {}", table))?;
        if !updated {
            warn!(%table, ?timeout, "Table did not settle at UPDATED");
            all = false;
        }
    }
    Ok(all)
}

async fn collect_report(
    registry: &MemoryRegistryHandle,
    store: &FileArtifactStore,
    coordinators: &[UpdateCoordinator],
    tables: &[String],
    options: &SimulationOptions,
    converged: bool,
) -> Result<SimulationReport> {
    let mut table_reports = Vec::with_capacity(tables.len());
    for table in tables {
        let final_state = coordinators[0].state(table).await?;
        let history = registry.flag_history(&flag_path(table)).await?;
        let artifact = store.load(table).await?.map(|published| ArtifactSummary {
            path: store.artifact_path(table),
            written_at: published.written_at,
            fields: published.metadata.len(),
        });
        table_reports.push(TableReport {
            table: table.clone(),
            final_state,
            history,
            artifact,
        });
    }

    let node_stats: Vec<NodeReport> = coordinators
        .iter()
        .map(|c| NodeReport {
            node: c.name().to_string(),
            stats: c.stats(),
        })
        .collect();
    let totals = node_stats
        .iter()
        .fold(UpdateStatsSnapshot::default(), |acc, n| acc + n.stats);

    Ok(SimulationReport {
        nodes: options.nodes,
        invalidations: options.invalidations,
        converged,
        tables: table_reports,
        node_stats,
        totals,
        registry: registry.metrics().await?,
    })
}
