//! In-memory coordination registry
//!
//! An actor task that plays the part of the coordination service:
//! - **Flags:** tri-state values, created on first use, watched per session
//! - **Locks:** session-scoped mutexes with FIFO waiters and bounded waits
//! - **Sessions:** liveness, expiry and partitions for failure simulation

mod config;
mod core;
mod handle;
mod messages;

pub use config::RegistryConfig;
pub use core::MemoryRegistry;
pub use handle::{MemoryRegistryHandle, MemorySession};
pub use messages::{RegistryMetrics, RegistryRequest};
