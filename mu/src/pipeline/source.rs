//! Metadata sources - where the authoritative type metadata comes from

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::metadata::TypeMetadata;
use crate::error::PipelineError;

/// Supplies current type metadata for a table
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, table: &str) -> Result<TypeMetadata, PipelineError>;
}

/// On-disk layout read by [`FileMetadataSource`]
#[derive(Debug, Default, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    tables: BTreeMap<String, TypeMetadata>,
}

/// Reads metadata from a YAML file, re-reading it on every fetch
///
/// ```yaml
/// tables:
///   tableA:
///     NAME:
///       csv: [LcNoDiacriticsType]
/// ```
pub struct FileMetadataSource {
    path: PathBuf,
}

impl FileMetadataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "FileMetadataSource::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetadataSource for FileMetadataSource {
    async fn fetch(&self, table: &str) -> Result<TypeMetadata, PipelineError> {
        debug!(%table, path = ?self.path, "FileMetadataSource::fetch: called");
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::source_unavailable(table, format!("{}: {}", self.path.display(), e)))?;

        let file: MetadataFile = serde_yaml::from_str(&content)
            .map_err(|e| PipelineError::source_unavailable(table, format!("invalid metadata file: {}", e)))?;

        file.tables
            .get(table)
            .cloned()
            .ok_or_else(|| PipelineError::source_unavailable(table, "table not present in metadata file"))
    }
}

/// Fixed metadata held in memory
#[derive(Default)]
pub struct StaticMetadataSource {
    tables: BTreeMap<String, TypeMetadata>,
}

impl StaticMetadataSource {
    pub fn new(tables: BTreeMap<String, TypeMetadata>) -> Self {
        debug!(tables = tables.len(), "StaticMetadataSource::new: called");
        Self { tables }
    }

    /// A small plausible metadata map for every given table
    pub fn sample(tables: &[String]) -> Self {
        let tables = tables
            .iter()
            .map(|table| {
                let metadata = TypeMetadata::new()
                    .with("NAME", "csv", "LcNoDiacriticsType")
                    .with("NAME", "json", "LcNoDiacriticsType")
                    .with("EVENT_DATE", "csv", "DateType")
                    .with("COUNT", "json", "NumberType");
                (table.clone(), metadata)
            })
            .collect();
        Self::new(tables)
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch(&self, table: &str) -> Result<TypeMetadata, PipelineError> {
        debug!(%table, "StaticMetadataSource::fetch: called");
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| PipelineError::source_unavailable(table, "no metadata for table"))
    }
}
