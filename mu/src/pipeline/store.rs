//! FileArtifactStore - durable, externally readable artifact storage
//!
//! Each table's artifact lives at `<root>/<table>/typeMetadata.json`. Writes
//! go to a temp file in the same directory and are renamed into place, so a
//! reader sees either the previous artifact or the new one, never a mix.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::metadata::TypeMetadata;
use crate::error::PipelineError;

/// Artifact file name inside a table directory
pub const ARTIFACT_FILE: &str = "typeMetadata.json";

/// What gets written for a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub table: String,
    #[serde(rename = "written-at")]
    pub written_at: DateTime<Utc>,
    pub metadata: TypeMetadata,
}

/// Artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "FileArtifactStore::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a table's artifact file
    pub fn artifact_path(&self, table: &str) -> PathBuf {
        self.root.join(table).join(ARTIFACT_FILE)
    }

    fn check_table_name(table: &str) -> Result<(), PipelineError> {
        if table.is_empty() || table == "." || table == ".." || table.contains(['/', '\\']) {
            return Err(PipelineError::persist(table, "invalid table name"));
        }
        Ok(())
    }

    /// Atomically replace the table's artifact
    pub async fn write(&self, table: &str, metadata: &TypeMetadata) -> Result<PathBuf, PipelineError> {
        debug!(%table, fields = metadata.len(), "FileArtifactStore::write: called");
        Self::check_table_name(table)?;

        let dir = self.root.join(table);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::persist(table, format!("create {}: {}", dir.display(), e)))?;

        let artifact = PublishedArtifact {
            table: table.to_string(),
            written_at: Utc::now(),
            metadata: metadata.clone(),
        };
        let body = serde_json::to_vec_pretty(&artifact).map_err(|e| PipelineError::persist(table, e))?;

        let tmp_path = dir.join(format!(".{}.{}.tmp", ARTIFACT_FILE, Uuid::now_v7()));
        let final_path = dir.join(ARTIFACT_FILE);

        let result: std::io::Result<()> = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &final_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(PipelineError::persist(table, format!("write {}: {}", final_path.display(), e)));
        }

        info!(%table, path = %final_path.display(), "Published type metadata");
        Ok(final_path)
    }

    /// Last published artifact for a table, if any
    pub async fn load(&self, table: &str) -> Result<Option<PublishedArtifact>, PipelineError> {
        debug!(%table, "FileArtifactStore::load: called");
        Self::check_table_name(table)?;

        let path = self.artifact_path(table);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%table, "FileArtifactStore::load: nothing published");
                return Ok(None);
            }
            Err(e) => return Err(PipelineError::persist(table, format!("read {}: {}", path.display(), e))),
        };

        let artifact = serde_json::from_slice(&content)
            .map_err(|e| PipelineError::persist(table, format!("corrupt artifact {}: {}", path.display(), e)))?;
        Ok(Some(artifact))
    }
}
