//! Core types shared across Scalewise components

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScalewiseError};

/// The four named pipeline queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Input,
    Worker,
    Result,
    Output,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Input,
        QueueName::Worker,
        QueueName::Result,
        QueueName::Output,
    ];
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueName::Input => write!(f, "input"),
            QueueName::Worker => write!(f, "worker"),
            QueueName::Result => write!(f, "result"),
            QueueName::Output => write!(f, "output"),
        }
    }
}

/// A new task produced by a workload source, before it is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub processing_time: f64,
    pub deadline: f64,
}

/// An image-processing task moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub enqueue_time: f64,
    pub processing_time: f64,
    pub deadline: f64,
    pub start_time: Option<f64>,
    pub completion_time: Option<f64>,
    pub qos_met: Option<bool>,
}

impl Task {
    /// Create a task whose deadline is `enqueue_time + deadline_coefficient * processing_time`
    pub fn new(id: u64, enqueue_time: f64, processing_time: f64, deadline_coefficient: f64) -> Self {
        Self::from_arrival(
            id,
            enqueue_time,
            Arrival {
                processing_time,
                deadline: enqueue_time + deadline_coefficient * processing_time,
            },
        )
    }

    pub fn from_arrival(id: u64, enqueue_time: f64, arrival: Arrival) -> Self {
        Task {
            id,
            enqueue_time,
            processing_time: arrival.processing_time,
            deadline: arrival.deadline,
            start_time: None,
            completion_time: None,
            qos_met: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion_time.is_some()
    }

    /// Time at which the task finishes if it started at `start_time`
    pub fn finish_time(&self) -> Option<f64> {
        self.start_time.map(|start| start + self.processing_time)
    }

    /// Record completion. `qos_met` is assigned exactly once.
    pub fn complete(&mut self, completion_time: f64) -> Result<bool> {
        if self.qos_met.is_some() {
            return Err(ScalewiseError::QosAlreadyAssigned { task_id: self.id });
        }
        let met = completion_time <= self.deadline;
        self.completion_time = Some(completion_time);
        self.qos_met = Some(met);
        Ok(met)
    }
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Provisioning,
    Active,
    Draining,
    Terminated,
}

/// A scaling decision: remove one worker, hold, or add one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScaleAction {
    Down,
    Hold,
    Up,
}

impl ScaleAction {
    /// All actions, in value-table column order
    pub const ALL: [ScaleAction; 3] = [ScaleAction::Down, ScaleAction::Hold, ScaleAction::Up];

    pub fn delta(self) -> i64 {
        match self {
            ScaleAction::Down => -1,
            ScaleAction::Hold => 0,
            ScaleAction::Up => 1,
        }
    }

    /// Column index in a value-table row
    pub fn index(self) -> usize {
        match self {
            ScaleAction::Down => 0,
            ScaleAction::Hold => 1,
            ScaleAction::Up => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Map any integer delta onto the action set, clamping out-of-range requests
    pub fn from_delta(delta: i64) -> Self {
        match delta.signum() {
            -1 => ScaleAction::Down,
            1 => ScaleAction::Up,
            _ => ScaleAction::Hold,
        }
    }

    pub fn is_scale(self) -> bool {
        self != ScaleAction::Hold
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+}", self.delta())
    }
}

/// Number of dimensions in an observation vector
pub const OBSERVATION_DIMS: usize = 9;

/// Fixed-size state vector handed to decision policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub input_q_len: f64,
    pub worker_q_len: f64,
    pub result_q_len: f64,
    pub output_q_len: f64,
    pub active_worker_count: f64,
    pub avg_processing_time: f64,
    pub max_processing_time: f64,
    pub arrival_rate: f64,
    pub qos_rate: f64,
}

impl Observation {
    pub fn to_array(&self) -> [f64; OBSERVATION_DIMS] {
        [
            self.input_q_len,
            self.worker_q_len,
            self.result_q_len,
            self.output_q_len,
            self.active_worker_count,
            self.avg_processing_time,
            self.max_processing_time,
            self.arrival_rate,
            self.qos_rate,
        ]
    }

    /// Tasks waiting to be picked up by a worker
    pub fn pending_depth(&self) -> f64 {
        self.input_q_len + self.worker_q_len
    }
}

/// One SARSA transition as seen by a decision policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub observation: Observation,
    pub action: ScaleAction,
    pub reward: f64,
    pub next_observation: Observation,
    /// Action already chosen for `next_observation`; `None` on the terminal step
    pub next_action: Option<ScaleAction>,
    pub done: bool,
}

/// Per-step telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    pub observation: Observation,
    pub action: ScaleAction,
    pub reward: f64,
    pub qos_rate: f64,
    pub active_workers: usize,
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_deadline_from_coefficient() {
        let task = Task::new(1, 0.0, 2.0, 2.0);
        assert_eq!(task.deadline, 4.0);
        assert!(task.qos_met.is_none());
    }

    #[test]
    fn test_task_completion_sets_qos_once() {
        let mut task = Task::new(1, 0.0, 2.0, 2.0);
        assert!(task.complete(4.0).unwrap());
        assert_eq!(task.completion_time, Some(4.0));

        let err = task.complete(5.0).unwrap_err();
        assert!(matches!(err, ScalewiseError::QosAlreadyAssigned { task_id: 1 }));
        assert_eq!(task.qos_met, Some(true));
    }

    #[test]
    fn test_late_completion_misses_qos() {
        let mut task = Task::new(7, 10.0, 1.0, 1.5);
        assert!(!task.complete(11.6).unwrap());
    }

    #[test]
    fn test_scale_action_clamps_delta() {
        assert_eq!(ScaleAction::from_delta(-5), ScaleAction::Down);
        assert_eq!(ScaleAction::from_delta(0), ScaleAction::Hold);
        assert_eq!(ScaleAction::from_delta(3), ScaleAction::Up);
        for action in ScaleAction::ALL {
            assert_eq!(ScaleAction::from_index(action.index()), Some(action));
        }
    }

    #[test]
    fn test_queue_name_serialization() {
        let json = serde_json::to_string(&QueueName::Worker).unwrap();
        assert_eq!(json, "\"worker\"");
    }
}
