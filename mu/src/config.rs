//! metaupdate configuration types and loading

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinationConfig;

/// Main metaupdate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry timeouts and buffers
    pub coordination: CoordinationConfig,

    /// Resource keys to keep fresh
    pub tables: Vec<String>,

    /// Where artifacts are published
    pub storage: StorageConfig,

    /// Where the authoritative type metadata comes from
    pub metadata: MetadataConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordination: CoordinationConfig::default(),
            tables: vec!["DatawaveMetadata".to_string()],
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Rejects empty or duplicate resource keys and zero timeouts.
    pub fn validate(&self) -> Result<()> {
        validate_tables(&self.tables)?;

        if self.coordination.connect_timeout_ms == 0 {
            return Err(eyre::eyre!("coordination.connect-timeout-ms must be greater than zero"));
        }
        if self.coordination.lock_timeout_ms == 0 {
            return Err(eyre::eyre!("coordination.lock-timeout-ms must be greater than zero"));
        }
        if self.coordination.channel_buffer == 0 {
            return Err(eyre::eyre!("coordination.channel-buffer must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .metaupdate.yml
        let local_config = PathBuf::from(".metaupdate.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/metaupdate/metaupdate.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("metaupdate").join("metaupdate.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of published artifacts
    #[serde(rename = "artifact-dir")]
    pub artifact_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // ~/.local/share/metaupdate/artifacts on Linux
        let artifact_dir = dirs::data_local_dir()
            .map(|d| d.join("metaupdate").join("artifacts"))
            .unwrap_or_else(|| PathBuf::from(".metaupdate/artifacts"));

        Self { artifact_dir }
    }
}

/// Metadata source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// YAML metadata file; built-in sample metadata when unset
    pub source: Option<PathBuf>,
}

/// Check a list of resource keys: non-empty, unique, usable as directory names
pub fn validate_tables(tables: &[String]) -> Result<()> {
    if tables.is_empty() {
        return Err(eyre::eyre!("No tables configured"));
    }

    let mut seen = HashSet::new();
    for table in tables {
        if table.trim().is_empty() {
            return Err(eyre::eyre!("Table names must not be empty"));
        }
        if table.contains(['/', '\\']) {
            return Err(eyre::eyre!("Table name {} must not contain path separators", table));
        }
        if !seen.insert(table.as_str()) {
            return Err(eyre::eyre!("Table {} configured more than once", table));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.tables, vec!["DatawaveMetadata".to_string()]);
        assert_eq!(config.coordination.lock_timeout_ms, 10_000);
        assert!(config.storage.artifact_dir.ends_with("artifacts"));
        assert!(config.metadata.source.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
coordination:
  connect-timeout-ms: 5000
  lock-timeout-ms: 2000
  channel-buffer: 64

tables:
  - tableA
  - tableB

storage:
  artifact-dir: /tmp/artifacts

metadata:
  source: /etc/metaupdate/metadata.yml
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.coordination.connect_timeout_ms, 5000);
        assert_eq!(config.coordination.lock_timeout_ms, 2000);
        assert_eq!(config.coordination.channel_buffer, 64);
        assert_eq!(config.tables, vec!["tableA".to_string(), "tableB".to_string()]);
        assert_eq!(config.storage.artifact_dir, PathBuf::from("/tmp/artifacts"));
        assert_eq!(
            config.metadata.source,
            Some(PathBuf::from("/etc/metaupdate/metadata.yml"))
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
coordination:
  lock-timeout-ms: 500
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.coordination.lock_timeout_ms, 500);

        // Defaults for unspecified
        assert_eq!(config.coordination.connect_timeout_ms, 30_000);
        assert_eq!(config.tables, vec!["DatawaveMetadata".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let mut config = Config::default();
        config.tables = vec![];
        assert!(config.validate().is_err());

        config.tables = vec!["tableA".to_string(), "tableA".to_string()];
        assert!(config.validate().unwrap_err().to_string().contains("more than once"));

        config.tables = vec![" ".to_string()];
        assert!(config.validate().is_err());

        config.tables = vec!["a/b".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.coordination.lock_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.coordination.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metaupdate.yml");
        std::fs::write(&path, "tables: [tableZ]\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tables, vec!["tableZ".to_string()]);
    }

    #[test]
    fn test_load_explicit_path_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());

        let invalid = temp_dir.path().join("invalid.yml");
        std::fs::write(&invalid, "tables: {not: [a list").unwrap();
        assert!(Config::load(Some(&invalid)).is_err());
    }
}
