//! Value types shared by every registry backend

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Replicated three-valued coordination register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriState {
    /// The derived artifact is stale and nobody is recomputing it
    NeedsUpdate,
    /// A lock holder is recomputing the artifact
    Updating,
    /// The artifact was published and is current
    Updated,
}

impl TriState {
    /// All values, in lifecycle order
    pub const ALL: [TriState; 3] = [TriState::NeedsUpdate, TriState::Updating, TriState::Updated];

    /// Whether `from -> to` is a legal move of the flag state machine
    ///
    /// Anything may be forced back to `NeedsUpdate`; `Updating` is only
    /// entered from `NeedsUpdate` and `Updated` only from `Updating`.
    pub fn can_transition(from: TriState, to: TriState) -> bool {
        debug!(%from, %to, "TriState::can_transition: called");
        match (from, to) {
            (_, TriState::NeedsUpdate) => true,
            (TriState::NeedsUpdate, TriState::Updating) => true,
            (TriState::Updating, TriState::Updated) => true,
            _ => false,
        }
    }

    /// The wire name used in flag payloads and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsUpdate => "NEEDS_UPDATE",
            Self::Updating => "UPDATING",
            Self::Updated => "UPDATED",
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NEEDS_UPDATE" => Ok(Self::NeedsUpdate),
            "UPDATING" => Ok(Self::Updating),
            "UPDATED" => Ok(Self::Updated),
            _ => Err(format!(
                "Unknown tri-state value: {}. Use: NEEDS_UPDATE, UPDATING, or UPDATED",
                s
            )),
        }
    }
}

/// Liveness of a session's connection to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connected,
    Suspended,
    Reconnected,
    /// The session is gone; its locks were released by the backend
    Lost,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Reconnected => write!(f, "RECONNECTED"),
            Self::Lost => write!(f, "LOST"),
        }
    }
}

/// Identity of one backend session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of one successful lock acquisition
///
/// The sequence number distinguishes repeated acquisitions of the same path
/// by the same session, so a stale token can never release a newer grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    pub path: String,
    pub session: SessionId,
    pub seq: u64,
}

/// Notification pushed by the backend onto a session's event channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A watched flag took a new value (or the initial observation after registering)
    FlagChanged { path: String, value: TriState },

    /// The session's connection changed state
    Connection(ConnectionState),
}
