//! Episode driver
//!
//! Runs the on-policy loop: the next action is chosen before the update so
//! SARSA bootstraps from the action it will actually take.

use scalewise_core::{DecisionPolicy, Result, ScaleAction, StepRecord, Transition};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::reward::{RewardCalculator, RewardInputs};
use crate::simulator::PipelineSimulator;

/// Aggregate statistics for one episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub policy_name: String,
    pub steps: usize,
    pub total_reward: f64,
    pub tasks_generated: usize,
    pub tasks_completed: usize,
    /// Fraction of completed tasks that met their deadline
    pub qos_rate: f64,
    pub mean_active_workers: f64,
    /// Steps whose action was Up or Down
    pub scale_actions: usize,
    pub records: Vec<StepRecord>,
}

pub struct ControlLoop {
    reward: RewardCalculator,
    initial_workers: usize,
}

impl ControlLoop {
    pub fn new(reward: RewardCalculator, initial_workers: usize) -> Self {
        ControlLoop {
            reward,
            initial_workers,
        }
    }

    /// Run one episode to completion. A fatal simulator error ends the
    /// episode and is returned after being logged.
    pub fn run_episode(
        &self,
        sim: &mut PipelineSimulator,
        policy: &mut dyn DecisionPolicy,
        episode: usize,
    ) -> Result<EpisodeSummary> {
        let mut observation = sim.reset(self.initial_workers)?;
        let mut action = policy.select_action(&observation);
        let mut records = Vec::new();
        let mut total_reward = 0.0;

        loop {
            let result = match sim.step(action) {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        episode,
                        policy = policy.name(),
                        step = sim.step_index(),
                        fatal = e.is_fatal(),
                        error = %e,
                        "episode aborted"
                    );
                    return Err(e);
                }
            };

            let reward = self
                .reward
                .compute(&RewardInputs::from_outcome(&result.outcome))
                .total;
            total_reward += reward;

            let next_action = if result.done {
                None
            } else {
                Some(policy.select_action(&result.observation))
            };
            policy.update(&Transition {
                observation,
                action,
                reward,
                next_observation: result.observation,
                next_action,
                done: result.done,
            });

            records.push(StepRecord {
                step_index: result.outcome.step_index,
                observation: result.observation,
                action,
                reward,
                qos_rate: result.outcome.qos_rate,
                active_workers: result.outcome.active_workers,
                done: result.done,
            });

            let Some(next) = next_action else { break };
            observation = result.observation;
            action = next;
        }
        policy.end_episode();

        let summary = self.summarize(sim, policy.name(), episode, total_reward, records);
        info!(
            episode,
            policy = %summary.policy_name,
            steps = summary.steps,
            total_reward = summary.total_reward,
            completed = summary.tasks_completed,
            generated = summary.tasks_generated,
            qos_rate = summary.qos_rate,
            mean_workers = summary.mean_active_workers,
            "episode complete"
        );
        Ok(summary)
    }

    /// Run `episodes` consecutive episodes with the same policy
    pub fn train(
        &self,
        sim: &mut PipelineSimulator,
        policy: &mut dyn DecisionPolicy,
        episodes: usize,
    ) -> Result<Vec<EpisodeSummary>> {
        let mut summaries = Vec::with_capacity(episodes);
        for episode in 0..episodes {
            summaries.push(self.run_episode(sim, policy, episode)?);
        }
        Ok(summaries)
    }

    fn summarize(
        &self,
        sim: &PipelineSimulator,
        policy_name: &str,
        episode: usize,
        total_reward: f64,
        records: Vec<StepRecord>,
    ) -> EpisodeSummary {
        let completions = sim.completions();
        let met = completions.iter().filter(|c| c.qos_met).count();
        let qos_rate = if completions.is_empty() {
            1.0
        } else {
            met as f64 / completions.len() as f64
        };
        let mean_active_workers = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.active_workers as f64).sum::<f64>() / records.len() as f64
        };
        let scale_actions = records.iter().filter(|r| r.action != ScaleAction::Hold).count();

        EpisodeSummary {
            episode,
            policy_name: policy_name.to_string(),
            steps: records.len(),
            total_reward,
            tasks_generated: sim.generated(),
            tasks_completed: completions.len(),
            qos_rate,
            mean_active_workers,
            scale_actions,
            records,
        }
    }
}
