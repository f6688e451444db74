//! Coordination session - one process's live connection to the registry
//!
//! A [`CoordinationSession`] owns a backend session and a single dispatcher
//! task that drains the session's event channel. Flag changes are handed to
//! the [`TriStateListener`] registered for that flag, in the order the
//! backend produced them. Lock-held flag writes go through a [`LockGuard`].

mod core;
mod guard;
mod listener;

pub use core::{CoordinationSession, SessionConfig, SessionHandle};
pub use guard::LockGuard;
pub use listener::TriStateListener;

/// Registry path of a resource key's tri-state flag
pub fn flag_path(key: &str) -> String {
    format!("{}:needsUpdate", key)
}

/// Registry path of a resource key's lock
pub fn lock_path(key: &str) -> String {
    format!("{}/lock", key)
}
