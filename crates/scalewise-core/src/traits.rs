//! Core traits for Scalewise
//!
//! The simulator consumes its collaborators through these interfaces ONLY:
//! the queue transport, the arrival schedule and the decision policy.

use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ScalewiseError};
use crate::types::{Arrival, Observation, QueueName, ScaleAction, Task, Transition};

/// Four named FIFO queues (input, worker, result, output)
pub trait QueueFacade {
    fn push(&mut self, queue: QueueName, task: Task);

    /// Pop the head of `queue`. An empty queue surfaces as
    /// [`ScalewiseError::QueueTimeout`](crate::ScalewiseError::QueueTimeout) once `timeout` elapses.
    fn pop(&mut self, queue: QueueName, timeout: Duration) -> Result<Task>;

    fn len(&self, queue: QueueName) -> usize;

    fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue) == 0
    }

    /// Remove every queued task
    fn clear(&mut self);
}

/// Produces arrivals for each control interval
pub trait WorkloadSource {
    /// Arrivals for the interval `[now, now + step_duration)`
    fn next_arrivals(&mut self, now: f64, step_duration: f64) -> Vec<Arrival>;

    /// True once the schedule will never produce another arrival
    fn is_exhausted(&self, now: f64) -> bool;

    /// Rewind the schedule for a new episode
    fn reset(&mut self);
}

/// Shared interface of every decision policy (tabular SARSA, reactive baselines)
pub trait DecisionPolicy {
    fn select_action(&mut self, observation: &Observation) -> ScaleAction;

    /// Learn from one transition. Non-learning policies ignore it.
    fn update(&mut self, transition: &Transition);

    /// Called once when an episode finishes
    fn end_episode(&mut self) {}

    /// Persist learned state. Policies without any refuse.
    fn save(&self, _path: &Path) -> Result<()> {
        Err(ScalewiseError::checkpoint(format!(
            "{} policy has no learned state to save",
            self.name()
        )))
    }

    fn load(&mut self, _path: &Path) -> Result<()> {
        Err(ScalewiseError::checkpoint(format!(
            "{} policy cannot load a checkpoint",
            self.name()
        )))
    }

    /// Whether `save`/`load` carry state
    fn is_learning(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}
