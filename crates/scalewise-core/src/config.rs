//! Immutable run configuration
//!
//! Loaded once from JSON, validated, then passed by value (or `Arc`) into
//! every component constructor. Reward weights and discretization buckets
//! carry no defaults: a config file must state them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScalewiseError};
use crate::types::OBSERVATION_DIMS;

/// Worker pool bounds and drain budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub initial_workers: usize,
    /// Simulated seconds a Draining worker may take to ACK
    pub drain_timeout_secs: f64,
}

/// Pipeline timing and windowing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub step_duration_secs: f64,
    /// Trailing window length, in steps
    pub observation_window: usize,
    pub max_steps: usize,
    pub deadline_coefficient: f64,
    /// Max tasks moved input -> worker queue per step (unbounded if absent)
    #[serde(default)]
    pub dispatch_batch_size: Option<usize>,
    /// Max tasks moved result -> output queue per step (unbounded if absent)
    #[serde(default)]
    pub collect_batch_size: Option<usize>,
    #[serde(default)]
    pub queue_pop_timeout_ms: u64,
}

/// Reward term weights and targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub qos_improvement_weight: f64,
    pub qos_regression_weight: f64,
    pub queue_weight: f64,
    pub queue_target: f64,
    pub worker_weight: f64,
    pub idle_threshold: usize,
    pub scaling_penalty: f64,
}

/// How a visit updates an eligibility trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// One-step SARSA, no traces
    Disabled,
    /// `e(s, a) += 1`
    Accumulating,
    /// `e(s, a) = 1`
    Replacing,
}

/// Geometric per-episode epsilon decay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonSchedule {
    pub start: f64,
    pub decay: f64,
    pub floor: f64,
}

/// Partition of one observation dimension into buckets
/// Bucket indices are stored as `u16`
pub const MAX_BUCKETS: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketSpec {
    /// Explicit ascending edges; `n` edges give `n + 1` buckets
    Edges { edges: Vec<f64> },
    /// `count` equal-width buckets over `[min, max)`
    Uniform { min: f64, max: f64, count: usize },
}

impl BucketSpec {
    /// Interior bucket edges in ascending order
    pub fn edges(&self) -> Vec<f64> {
        match self {
            BucketSpec::Edges { edges } => edges.clone(),
            BucketSpec::Uniform { min, max, count } => {
                let width = (max - min) / *count as f64;
                (1..*count).map(|i| min + width * i as f64).collect()
            }
        }
    }

    pub fn bucket_count(&self) -> usize {
        match self {
            BucketSpec::Edges { edges } => edges.len() + 1,
            BucketSpec::Uniform { count, .. } => *count,
        }
    }

    fn validate(&self, dim: usize) -> Result<()> {
        if self.bucket_count() > MAX_BUCKETS {
            return Err(ScalewiseError::config(format!(
                "dimension {dim} has {} buckets, at most {MAX_BUCKETS} allowed",
                self.bucket_count()
            )));
        }
        match self {
            BucketSpec::Edges { edges } => {
                if edges.iter().any(|e| !e.is_finite()) {
                    return Err(ScalewiseError::config(format!(
                        "bucket edges for dimension {dim} must be finite"
                    )));
                }
                if edges.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(ScalewiseError::config(format!(
                        "bucket edges for dimension {dim} must be strictly ascending"
                    )));
                }
            }
            BucketSpec::Uniform { min, max, count } => {
                if *count == 0 || !(max > min) {
                    return Err(ScalewiseError::config(format!(
                        "uniform buckets for dimension {dim} need count >= 1 and max > min"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// SARSA(lambda) hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub gamma: f64,
    pub lambda: f64,
    pub traces: TraceMode,
    pub epsilon: EpsilonSchedule,
    /// One spec per observation dimension
    pub buckets: Vec<BucketSpec>,
    #[serde(default)]
    pub seed: u64,
}

/// Sinusoidal modulation of a phase's arrival rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillationConfig {
    pub amplitude: f64,
    pub period_secs: f64,
}

/// One segment of the arrival schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub rate_multiplier: f64,
    pub duration_secs: f64,
    #[serde(default)]
    pub oscillation: Option<OscillationConfig>,
}

/// Gamma(shape, scale) processing-time model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimeConfig {
    pub shape: f64,
    pub scale: f64,
}

/// Synthetic arrival schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default)]
    pub seed: u64,
    /// Arrivals per second before phase multipliers
    pub base_rate: f64,
    pub phases: Vec<PhaseConfig>,
    pub processing_time: ProcessingTimeConfig,
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalewiseConfig {
    pub pool: PoolConfig,
    pub simulation: SimulationConfig,
    pub reward: RewardConfig,
    pub agent: AgentConfig,
    pub workload: WorkloadConfig,
}

impl ScalewiseConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: ScalewiseConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the control loop meaningless
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.min_workers > pool.max_workers {
            return Err(ScalewiseError::config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                pool.min_workers, pool.max_workers
            )));
        }
        if pool.max_workers == 0 {
            return Err(ScalewiseError::config("max_workers must be at least 1"));
        }
        if pool.initial_workers < pool.min_workers || pool.initial_workers > pool.max_workers {
            return Err(ScalewiseError::config(format!(
                "initial_workers ({}) outside [{}, {}]",
                pool.initial_workers, pool.min_workers, pool.max_workers
            )));
        }
        if !(pool.drain_timeout_secs > 0.0) {
            return Err(ScalewiseError::config("drain_timeout_secs must be positive"));
        }

        let sim = &self.simulation;
        if !(sim.step_duration_secs > 0.0) {
            return Err(ScalewiseError::config("step_duration_secs must be positive"));
        }
        if sim.observation_window == 0 {
            return Err(ScalewiseError::config("observation_window must be at least 1 step"));
        }
        if sim.max_steps == 0 {
            return Err(ScalewiseError::config("max_steps must be at least 1"));
        }
        if !(sim.deadline_coefficient > 0.0) {
            return Err(ScalewiseError::config("deadline_coefficient must be positive"));
        }
        if sim.dispatch_batch_size == Some(0) || sim.collect_batch_size == Some(0) {
            return Err(ScalewiseError::config("batch sizes must be at least 1 when set"));
        }

        if self.reward.queue_target < 0.0 {
            return Err(ScalewiseError::config("queue_target must be non-negative"));
        }

        let agent = &self.agent;
        if !(agent.learning_rate > 0.0 && agent.learning_rate <= 1.0) {
            return Err(ScalewiseError::config("learning_rate must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&agent.gamma) || !(0.0..=1.0).contains(&agent.lambda) {
            return Err(ScalewiseError::config("gamma and lambda must be in [0, 1]"));
        }
        let eps = agent.epsilon;
        if !(0.0..=1.0).contains(&eps.start)
            || !(0.0..=1.0).contains(&eps.floor)
            || !(0.0..=1.0).contains(&eps.decay)
        {
            return Err(ScalewiseError::config("epsilon start, decay and floor must be in [0, 1]"));
        }
        if agent.buckets.len() != OBSERVATION_DIMS {
            return Err(ScalewiseError::config(format!(
                "expected {} bucket specs, got {}",
                OBSERVATION_DIMS,
                agent.buckets.len()
            )));
        }
        for (dim, spec) in agent.buckets.iter().enumerate() {
            spec.validate(dim)?;
        }

        let workload = &self.workload;
        if workload.base_rate < 0.0 {
            return Err(ScalewiseError::config("base_rate must be non-negative"));
        }
        if workload.phases.is_empty() {
            return Err(ScalewiseError::config("workload needs at least one phase"));
        }
        for (i, phase) in workload.phases.iter().enumerate() {
            if phase.rate_multiplier < 0.0 || !(phase.duration_secs > 0.0) {
                return Err(ScalewiseError::config(format!(
                    "phase {i} needs a non-negative rate_multiplier and positive duration"
                )));
            }
            if let Some(osc) = phase.oscillation {
                if !(osc.period_secs > 0.0) || !(0.0..=1.0).contains(&osc.amplitude) {
                    return Err(ScalewiseError::config(format!(
                        "phase {i} oscillation needs amplitude in [0, 1] and positive period"
                    )));
                }
            }
        }
        let pt = workload.processing_time;
        if !(pt.shape > 0.0 && pt.scale > 0.0) {
            return Err(ScalewiseError::config("processing_time shape and scale must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "pool": { "min_workers": 1, "max_workers": 8, "initial_workers": 2, "drain_timeout_secs": 120.0 },
        "simulation": { "step_duration_secs": 1.0, "observation_window": 10, "max_steps": 500, "deadline_coefficient": 2.0 },
        "reward": {
            "qos_improvement_weight": 10.0, "qos_regression_weight": 15.0,
            "queue_weight": 2.0, "queue_target": 5.0,
            "worker_weight": 0.1, "idle_threshold": 2, "scaling_penalty": 0.05
        },
        "agent": {
            "learning_rate": 0.1, "gamma": 0.9, "lambda": 0.8, "traces": "accumulating",
            "epsilon": { "start": 1.0, "decay": 0.95, "floor": 0.05 },
            "buckets": [
                { "kind": "edges", "edges": [1.0, 5.0, 20.0] },
                { "kind": "edges", "edges": [1.0, 5.0, 20.0] },
                { "kind": "edges", "edges": [1.0] },
                { "kind": "edges", "edges": [] },
                { "kind": "uniform", "min": 0.0, "max": 8.0, "count": 4 },
                { "kind": "edges", "edges": [1.0, 3.0] },
                { "kind": "edges", "edges": [2.0, 6.0] },
                { "kind": "edges", "edges": [0.5, 2.0, 5.0] },
                { "kind": "edges", "edges": [0.5, 0.8, 0.95] }
            ]
        },
        "workload": {
            "base_rate": 1.5,
            "phases": [
                { "rate_multiplier": 1.0, "duration_secs": 100.0 },
                { "rate_multiplier": 3.0, "duration_secs": 50.0, "oscillation": { "amplitude": 0.5, "period_secs": 20.0 } }
            ],
            "processing_time": { "shape": 2.0, "scale": 1.0 }
        }
    }"#;

    fn sample() -> ScalewiseConfig {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_sample_config_parses_and_validates() {
        let config = sample();
        config.validate().unwrap();
        assert_eq!(config.simulation.dispatch_batch_size, None);
        assert_eq!(config.agent.traces, TraceMode::Accumulating);
        assert_eq!(config.agent.buckets[4].bucket_count(), 4);
    }

    #[test]
    fn test_reward_weights_are_required() {
        let stripped = SAMPLE.replace("\"scaling_penalty\": 0.05", "\"unused\": 0.0");
        assert!(serde_json::from_str::<ScalewiseConfig>(&stripped).is_err());
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = sample();
        config.pool.min_workers = 9;
        assert!(matches!(config.validate(), Err(ScalewiseError::Config(_))));

        let mut config = sample();
        config.pool.initial_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_count_must_match_observation() {
        let mut config = sample();
        config.agent.buckets.pop();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("expected 9 bucket specs"));
    }

    #[test]
    fn test_non_ascending_edges_rejected() {
        let mut config = sample();
        config.agent.buckets[0] = BucketSpec::Edges { edges: vec![5.0, 1.0] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_uniform_edges() {
        let spec = BucketSpec::Uniform { min: 0.0, max: 8.0, count: 4 };
        assert_eq!(spec.edges(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_bucket_count_is_capped() {
        let mut config = sample();
        config.agent.buckets[2] = BucketSpec::Uniform {
            min: 0.0,
            max: 1.0,
            count: MAX_BUCKETS + 1,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most"));

        config.agent.buckets[2] = BucketSpec::Uniform {
            min: 0.0,
            max: 1.0,
            count: 1000,
        };
        config.validate().unwrap();
    }
}
