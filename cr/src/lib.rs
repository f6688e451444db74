//! coordreg - session-scoped coordination registry
//!
//! The coordination service that a fleet of processes uses to agree on who
//! recomputes a shared artifact, reduced to the primitives that matter:
//!
//! - [`TriState`] flags that every session can read, write and watch
//! - named locks owned by a session and released when the session dies
//! - a per-session event channel carrying flag changes and connection states
//!
//! Backends implement [`Registry`] and [`RegistrySession`]. The
//! [`memory`] backend keeps everything in one actor task and adds the
//! controls needed to simulate crashes and partitions.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::RegistryError;
pub use memory::{MemoryRegistry, MemoryRegistryHandle, MemorySession, RegistryConfig, RegistryMetrics};
pub use traits::{Connection, Registry, RegistryResult, RegistrySession};
pub use types::{ConnectionState, LockToken, RegistryEvent, SessionId, TriState};
