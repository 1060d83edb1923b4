//! Scalewise Core - Shared types and traits
//!
//! This crate defines the abstractions used across:
//! - scalewise-simulation-engine (pipeline simulator, worker lifecycle, SARSA agent)
//! - the `scalewise-sim` binary
//!
//! Key types:
//! - QueueFacade / WorkloadSource / DecisionPolicy traits (the seams to external collaborators)
//! - Task, Worker state, Observation and telemetry records
//! - Configuration and error types

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;
