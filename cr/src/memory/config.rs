//! In-memory registry configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

/// MemoryRegistry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Channel buffer size for registry requests
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Max values remembered per flag history (oldest dropped first)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

fn default_history_limit() -> usize {
    debug!("default_history_limit: called");
    1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        debug!("RegistryConfig::default: called");
        Self {
            channel_buffer: 1000,
            history_limit: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.channel_buffer, 1000);
        assert_eq!(config.history_limit, 1024);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"channel_buffer": 8}"#).unwrap();
        assert_eq!(config.channel_buffer, 8);
        assert_eq!(config.history_limit, 1024);
    }
}
