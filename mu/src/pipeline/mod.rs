//! Artifact pipeline - fetch the current source data and publish the artifact
//!
//! The coordinator only decides *when* and *by whom* these run; everything
//! about the artifact's contents and storage lives behind [`ArtifactPipeline`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

mod metadata;
mod source;
mod store;

pub use metadata::TypeMetadata;
pub use source::{FileMetadataSource, MetadataSource, StaticMetadataSource};
pub use store::{ARTIFACT_FILE, FileArtifactStore, PublishedArtifact};

use crate::error::PipelineError;

/// Source data an artifact is computed from
pub type ArtifactSource = TypeMetadata;

/// Recompute-and-publish operations invoked by the elected process
///
/// `publish` must be all-or-nothing: a failed publish leaves the previously
/// published artifact in place.
#[async_trait]
pub trait ArtifactPipeline: Send + Sync {
    /// Gather the authoritative current source data for `key`
    async fn fetch_current(&self, key: &str) -> Result<ArtifactSource, PipelineError>;

    /// Serialize and durably write the artifact for `key`
    async fn publish(&self, key: &str, source: &ArtifactSource) -> Result<(), PipelineError>;
}

/// Type metadata from a [`MetadataSource`] written to a [`FileArtifactStore`]
pub struct TypeMetadataPipeline {
    source: Arc<dyn MetadataSource>,
    store: FileArtifactStore,
}

impl TypeMetadataPipeline {
    pub fn new(source: Arc<dyn MetadataSource>, store: FileArtifactStore) -> Self {
        debug!(root = ?store.root(), "TypeMetadataPipeline::new: called");
        Self { source, store }
    }

    pub fn store(&self) -> &FileArtifactStore {
        &self.store
    }
}

#[async_trait]
impl ArtifactPipeline for TypeMetadataPipeline {
    async fn fetch_current(&self, key: &str) -> Result<ArtifactSource, PipelineError> {
        debug!(%key, "TypeMetadataPipeline::fetch_current: called");
        self.source.fetch(key).await
    }

    async fn publish(&self, key: &str, source: &ArtifactSource) -> Result<(), PipelineError> {
        debug!(%key, fields = source.len(), "TypeMetadataPipeline::publish: called");
        self.store.write(key, source).await.map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_type_metadata_pipeline_publishes_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(StaticMetadataSource::sample(&["tableA".to_string()]));
        let pipeline = TypeMetadataPipeline::new(source, FileArtifactStore::new(temp_dir.path()));

        let current = pipeline.fetch_current("tableA").await.unwrap();
        pipeline.publish("tableA", &current).await.unwrap();

        let published = pipeline.store().load("tableA").await.unwrap().unwrap();
        assert_eq!(published.metadata, current);
    }

    #[tokio::test]
    async fn test_type_metadata_pipeline_unknown_table() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(StaticMetadataSource::default());
        let pipeline = TypeMetadataPipeline::new(source, FileArtifactStore::new(temp_dir.path()));

        let result = pipeline.fetch_current("tableA").await;
        assert!(matches!(result, Err(PipelineError::SourceUnavailable { .. })));
        assert!(pipeline.store().load("tableA").await.unwrap().is_none());
    }
}
