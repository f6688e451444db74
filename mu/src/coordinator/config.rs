//! Coordination configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Timeouts and buffers for coordination sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// How long session start waits for the registry
    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a triggered coordinator waits for the per-key lock
    #[serde(rename = "lock-timeout-ms", default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Request channel buffer of the in-process registry
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_connect_timeout_ms() -> u64 {
    debug!("default_connect_timeout_ms: called");
    30_000
}

fn default_lock_timeout_ms() -> u64 {
    debug!("default_lock_timeout_ms: called");
    10_000
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        debug!("CoordinationConfig::default: called");
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl CoordinationConfig {
    pub fn connect_timeout(&self) -> Duration {
        debug!(connect_timeout_ms = %self.connect_timeout_ms, "CoordinationConfig::connect_timeout: called");
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        debug!(lock_timeout_ms = %self.lock_timeout_ms, "CoordinationConfig::lock_timeout: called");
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Same settings with both timeouts replaced
    pub fn with_timeouts(mut self, connect: Duration, lock: Duration) -> Self {
        self.connect_timeout_ms = connect.as_millis() as u64;
        self.lock_timeout_ms = lock.as_millis() as u64;
        self
    }
}
