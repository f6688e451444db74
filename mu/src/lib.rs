//! metaupdate - keep a fleet's cached type metadata fresh without stampedes
//!
//! Many query-serving processes share one published type-metadata artifact
//! per table. When a table's metadata goes stale, exactly one of them should
//! recompute and publish it while the rest wait or skip. metaupdate runs that
//! election through a coordination registry ([`coordreg`]): a tri-state flag
//! per table says whether the artifact is current, and a per-table lock
//! decides who recomputes it.
//!
//! # Core Concepts
//!
//! - **Tri-state flag**: NEEDS_UPDATE, UPDATING or UPDATED, watched by every process
//! - **Elect-and-recompute**: lock, re-check, mark UPDATING, publish, mark UPDATED
//! - **Session-scoped locks**: a crashed recomputer's lock is released by the registry
//! - **Revert on failure**: a failed recompute puts the flag back to NEEDS_UPDATE
//!
//! # Modules
//!
//! - [`session`] - Coordination session, listeners and lock guards
//! - [`coordinator`] - Update coordinator running the elect-and-recompute protocol
//! - [`pipeline`] - Artifact pipeline, metadata sources and artifact store
//! - [`simulate`] - In-process fleet simulation
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod simulate;

pub use config::Config;
pub use coordinator::{CoordinationConfig, UpdateCoordinator, UpdateStatsSnapshot};
pub use error::{CoordError, PipelineError};
pub use pipeline::{ArtifactPipeline, ArtifactSource, TypeMetadata, TypeMetadataPipeline};
pub use session::{CoordinationSession, LockGuard, SessionConfig, SessionHandle, TriStateListener};
