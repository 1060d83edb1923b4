//! Reward shaping for the autoscaling agent
//!
//! ```text
//! reward = qos_delta_term        (+ improvement / - regression)
//!        - queue_weight  * excess / (excess + queue_target)
//!        - worker_weight * max(0, workers - idle_threshold)
//!        - scaling_penalty         if action != 0
//! ```

use scalewise_core::{RewardConfig, ScaleAction};
use serde::{Deserialize, Serialize};

use crate::simulator::StepOutcome;

/// Everything the reward depends on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardInputs {
    pub prev_qos_rate: f64,
    pub qos_rate: f64,
    pub queue_depth: f64,
    pub active_workers: usize,
    pub action: ScaleAction,
}

impl RewardInputs {
    pub fn from_outcome(outcome: &StepOutcome) -> Self {
        RewardInputs {
            prev_qos_rate: outcome.prev_qos_rate,
            qos_rate: outcome.qos_rate,
            queue_depth: outcome.queue_depth as f64,
            active_workers: outcome.active_workers,
            action: outcome.action,
        }
    }
}

/// Reward split into its terms, for telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub qos: f64,
    pub queue: f64,
    pub workers: f64,
    pub scaling: f64,
    pub total: f64,
}

/// Stateless reward function over [`RewardInputs`]
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn compute(&self, inputs: &RewardInputs) -> RewardBreakdown {
        let c = &self.config;

        let delta = inputs.qos_rate - inputs.prev_qos_rate;
        let qos = if delta >= 0.0 {
            c.qos_improvement_weight * delta
        } else {
            c.qos_regression_weight * delta
        };

        let excess = (inputs.queue_depth - c.queue_target).max(0.0);
        let queue = if excess > 0.0 {
            -c.queue_weight * excess / (excess + c.queue_target)
        } else {
            0.0
        };

        let over_idle = inputs.active_workers.saturating_sub(c.idle_threshold) as f64;
        let workers = -c.worker_weight * over_idle;

        let scaling = if inputs.action.is_scale() {
            -c.scaling_penalty
        } else {
            0.0
        };

        RewardBreakdown {
            qos,
            queue,
            workers,
            scaling,
            total: qos + queue + workers + scaling,
        }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> RewardCalculator {
        RewardCalculator::new(RewardConfig {
            qos_improvement_weight: 10.0,
            qos_regression_weight: 20.0,
            queue_weight: 2.0,
            queue_target: 5.0,
            worker_weight: 0.5,
            idle_threshold: 2,
            scaling_penalty: 0.25,
        })
    }

    fn inputs() -> RewardInputs {
        RewardInputs {
            prev_qos_rate: 0.9,
            qos_rate: 0.9,
            queue_depth: 0.0,
            active_workers: 2,
            action: ScaleAction::Hold,
        }
    }

    #[test]
    fn test_neutral_step_is_zero() {
        assert_eq!(calculator().compute(&inputs()).total, 0.0);
    }

    #[test]
    fn test_reward_is_pure() {
        let calc = calculator();
        let x = RewardInputs {
            qos_rate: 0.5,
            queue_depth: 12.0,
            active_workers: 6,
            action: ScaleAction::Up,
            ..inputs()
        };
        assert_eq!(calc.compute(&x), calc.compute(&x));
    }

    #[test]
    fn test_qos_terms_are_asymmetric() {
        let calc = calculator();
        let better = calc.compute(&RewardInputs { qos_rate: 1.0, ..inputs() });
        let worse = calc.compute(&RewardInputs { qos_rate: 0.8, ..inputs() });
        assert!((better.qos - 1.0).abs() < 1e-9);
        assert!((worse.qos + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_queue_penalty_is_monotone_and_bounded() {
        let calc = calculator();
        let mut last = 0.0;
        for depth in [5.0, 6.0, 10.0, 50.0, 5000.0] {
            let penalty = calc.compute(&RewardInputs { queue_depth: depth, ..inputs() }).queue;
            assert!(penalty <= last);
            assert!(penalty > -2.0);
            last = penalty;
        }
        let at_double = calc.compute(&RewardInputs { queue_depth: 10.0, ..inputs() });
        assert!((at_double.queue + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_worker_penalty_linear_above_threshold() {
        let calc = calculator();
        let at_threshold = calc.compute(&RewardInputs { active_workers: 2, ..inputs() });
        let above = calc.compute(&RewardInputs { active_workers: 6, ..inputs() });
        assert_eq!(at_threshold.workers, 0.0);
        assert_eq!(above.workers, -2.0);
    }

    #[test]
    fn test_scaling_penalty_for_any_scale() {
        let calc = calculator();
        for action in [ScaleAction::Up, ScaleAction::Down] {
            let r = calc.compute(&RewardInputs { action, ..inputs() });
            assert_eq!(r.scaling, -0.25);
            assert_eq!(r.total, -0.25);
        }
    }
}
