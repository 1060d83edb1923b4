//! Reactive scaling baselines
//!
//! Compared against the learned agent on the same workload:
//! - Static: never rescales, the pool stays at its initial size
//! - Threshold: pending-tasks-per-worker hysteresis with a cooldown

use scalewise_core::{DecisionPolicy, Observation, ScaleAction, Transition};

/// Fixed pool: always holds
#[derive(Debug, Default)]
pub struct StaticPolicy;

impl StaticPolicy {
    pub fn new() -> Self {
        StaticPolicy
    }
}

impl DecisionPolicy for StaticPolicy {
    fn select_action(&mut self, _observation: &Observation) -> ScaleAction {
        ScaleAction::Hold
    }

    fn update(&mut self, _transition: &Transition) {}

    fn name(&self) -> &str {
        "Static"
    }
}

/// Scales on pending tasks per active worker.
///
/// Up when the backlog per worker exceeds `scale_up_per_worker`, down when
/// it falls below `scale_down_per_worker`. After any scale the policy holds
/// for `cooldown_steps` steps so a provisioning worker can take effect.
#[derive(Debug)]
pub struct ThresholdPolicy {
    pub scale_up_per_worker: f64,
    pub scale_down_per_worker: f64,
    pub cooldown_steps: usize,
    cooldown_remaining: usize,
    pub total_scale_ups: usize,
    pub total_scale_downs: usize,
}

impl ThresholdPolicy {
    pub fn new(scale_up_per_worker: f64, scale_down_per_worker: f64, cooldown_steps: usize) -> Self {
        ThresholdPolicy {
            scale_up_per_worker,
            scale_down_per_worker,
            cooldown_steps,
            cooldown_remaining: 0,
            total_scale_ups: 0,
            total_scale_downs: 0,
        }
    }

    fn backlog_per_worker(observation: &Observation) -> f64 {
        observation.pending_depth() / observation.active_worker_count.max(1.0)
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::new(2.0, 0.5, 3)
    }
}

impl DecisionPolicy for ThresholdPolicy {
    fn select_action(&mut self, observation: &Observation) -> ScaleAction {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
            return ScaleAction::Hold;
        }

        let backlog = Self::backlog_per_worker(observation);
        let action = if backlog > self.scale_up_per_worker {
            self.total_scale_ups += 1;
            ScaleAction::Up
        } else if backlog < self.scale_down_per_worker {
            self.total_scale_downs += 1;
            ScaleAction::Down
        } else {
            ScaleAction::Hold
        };

        if action.is_scale() {
            self.cooldown_remaining = self.cooldown_steps;
        }
        action
    }

    fn update(&mut self, _transition: &Transition) {}

    fn end_episode(&mut self) {
        self.cooldown_remaining = 0;
    }

    fn name(&self) -> &str {
        "Threshold"
    }
}
