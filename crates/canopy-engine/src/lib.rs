//! Canopy placement engine.
//!
//! Ties workspace discovery to the scheduler. [`PlacementEngine`] finds
//! cluster targets across every workspace the caller may see, filters and
//! scores them against a [`PlacementPolicy`](canopy_types::PlacementPolicy),
//! distributes replicas and records the outcome as an auditable
//! [`PlacementDecision`](canopy_types::PlacementDecision). Decisions can
//! later be checked for drift and revised with minimal movement.
//!
//! Configuration is read from a `canopy.toml` file ([`EngineConfig`]).

pub mod config;
pub mod engine;
pub mod error;

pub use config::{EngineConfig, ScoringSection};
pub use engine::{ClusterSearch, Drift, PlacementEngine, PlacementValidation, moved_replicas};
pub use error::{EngineError, EngineResult, WorkspaceFailure};
