//! Error types for Scalewise

use std::time::Duration;
use thiserror::Error;

use crate::types::QueueName;

/// Result type for Scalewise operations
pub type Result<T> = std::result::Result<T, ScalewiseError>;

/// Core error type for Scalewise operations
///
/// Only invariant violations are fatal to an episode. Queue timeouts are
/// absorbed by the simulator as empty pops.
#[derive(Error, Debug)]
pub enum ScalewiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pop on {queue} queue timed out after {timeout:?}")]
    QueueTimeout { queue: QueueName, timeout: Duration },

    #[error("Worker {worker_id} did not acknowledge drain within {waited_secs:.1}s (holding task {task_id:?})")]
    WorkerDrainTimeout {
        worker_id: u64,
        task_id: Option<u64>,
        waited_secs: f64,
    },

    #[error("Worker id {worker_id} reused before it was observed Terminated")]
    WorkerIdentityReuse { worker_id: u64 },

    #[error("Task conservation violated: {generated} generated, {accounted} accounted for")]
    TaskConservation { generated: usize, accounted: usize },

    #[error("Task {task_id} completed twice")]
    QosAlreadyAssigned { task_id: u64 },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScalewiseError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Whether this error ends the current episode
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::QueueTimeout { .. })
    }
}
