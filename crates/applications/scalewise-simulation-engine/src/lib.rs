//! Scalewise Simulation Engine
//!
//! Step-based simulator of a four-queue processing pipeline whose worker pool
//! is resized by a decision policy once per control interval.
//!
//! - `simulator`: queue flow, task conservation, observation window
//! - `workers`: drain-safe worker lifecycle (SYN/ACK handshake)
//! - `reward`, `discretize`, `sarsa`, `checkpoint`: the learning agent
//! - `policies`: reactive baselines
//! - `control`: episode driver

pub mod checkpoint;
pub mod control;
pub mod discretize;
pub mod policies;
pub mod queue;
pub mod reward;
pub mod sarsa;
pub mod simulator;
pub mod workers;
pub mod workload;
