//! Update coordinator - elect-and-recompute over the coordination registry
//!
//! For every registered resource key:
//! - **Bootstrap:** force the key's flag to NEEDS_UPDATE and watch it
//! - **Elect:** on any value other than UPDATED, race for the key's lock
//! - **Recompute:** under the lock, re-check, mark UPDATING, run the
//!   artifact pipeline and mark UPDATED, or revert to NEEDS_UPDATE on failure

mod config;
mod core;
mod listener;
mod stats;

pub use config::CoordinationConfig;
pub use core::UpdateCoordinator;
pub use listener::UpdateListener;
pub use stats::{UpdateStats, UpdateStatsSnapshot};
