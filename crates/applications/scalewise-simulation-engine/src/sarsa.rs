//! Tabular SARSA(λ) autoscaling agent
//!
//! ```text
//! td    = r + γ·Q(s', a') − Q(s, a)        (γ·Q(s', a') dropped when done)
//! e(s,a) += 1   (accumulating)  |  e(s,a) = 1   (replacing)
//! ∀(x,b): Q(x,b) += α·td·e(x,b);  e(x,b) *= γλ
//! ```
//!
//! Without traces only Q(s, a) moves. Exploration is ε-greedy with ε decayed
//! geometrically once per episode down to a floor.

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scalewise_core::{
    AgentConfig, DecisionPolicy, Observation, Result, ScaleAction, TraceMode, Transition,
};
use tracing::debug;

use crate::checkpoint::{AgentCheckpoint, TraceEntry, ValueEntry, CHECKPOINT_VERSION};
use crate::discretize::{Discretizer, StateKey};

/// Greedy tie-break order: hold, then shrink, then grow
const TIE_BREAK_ORDER: [ScaleAction; 3] = [ScaleAction::Hold, ScaleAction::Down, ScaleAction::Up];

/// Traces below this no longer move any value measurably
const TRACE_FLOOR: f64 = 1e-12;

/// Action values per discretized state, zero until first written
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    rows: HashMap<StateKey, [f64; 3]>,
}

impl ValueTable {
    /// Row for `key`, or zeros when the state was never visited
    pub fn row(&self, key: &StateKey) -> [f64; 3] {
        self.rows.get(key).copied().unwrap_or([0.0; 3])
    }

    pub fn row_mut(&mut self, key: StateKey) -> &mut [f64; 3] {
        self.rows.entry(key).or_insert([0.0; 3])
    }

    pub fn value(&self, key: &StateKey, action: ScaleAction) -> f64 {
        self.row(key)[action.index()]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &[f64; 3])> {
        self.rows.iter()
    }
}

pub struct SarsaAgent {
    config: AgentConfig,
    discretizer: Discretizer,
    q: ValueTable,
    traces: HashMap<(StateKey, ScaleAction), f64>,
    epsilon: f64,
    episodes: usize,
    rng: StdRng,
}

impl SarsaAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let discretizer = Discretizer::from_specs(&config.buckets)?;
        Ok(SarsaAgent {
            epsilon: config.epsilon.start,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            discretizer,
            q: ValueTable::default(),
            traces: HashMap::new(),
            episodes: 0,
        })
    }

    pub fn state_key(&self, observation: &Observation) -> StateKey {
        self.discretizer.key(observation)
    }

    /// ε-greedy choice for an already discretized state
    pub fn select_for_key(&mut self, key: &StateKey) -> ScaleAction {
        if self.rng.gen_bool(self.epsilon.clamp(0.0, 1.0)) {
            ScaleAction::ALL[self.rng.gen_range(0..ScaleAction::ALL.len())]
        } else {
            self.greedy_action(key)
        }
    }

    /// Argmax over the row; ties resolved by [`TIE_BREAK_ORDER`]
    pub fn greedy_action(&self, key: &StateKey) -> ScaleAction {
        let row = self.q.row(key);
        let mut best = TIE_BREAK_ORDER[0];
        for &candidate in &TIE_BREAK_ORDER[1..] {
            if row[candidate.index()] > row[best.index()] {
                best = candidate;
            }
        }
        best
    }

    /// One SARSA(λ) backup. Returns the TD error.
    pub fn update_keys(
        &mut self,
        state: StateKey,
        action: ScaleAction,
        reward: f64,
        next_state: StateKey,
        next_action: Option<ScaleAction>,
        done: bool,
    ) -> f64 {
        let alpha = self.config.learning_rate;
        let gamma = self.config.gamma;

        let bootstrap = match (done, next_action) {
            (false, Some(next)) => gamma * self.q.value(&next_state, next),
            _ => 0.0,
        };
        let td_error = reward + bootstrap - self.q.value(&state, action);

        match self.config.traces {
            TraceMode::Disabled => {
                self.q.row_mut(state)[action.index()] += alpha * td_error;
            }
            mode => {
                let trace = self.traces.entry((state, action)).or_insert(0.0);
                if mode == TraceMode::Replacing {
                    *trace = 1.0;
                } else {
                    *trace += 1.0;
                }

                let decay = gamma * self.config.lambda;
                for ((key, act), e) in self.traces.iter_mut() {
                    self.q.row_mut(*key)[act.index()] += alpha * td_error * *e;
                    *e *= decay;
                }
                self.traces.retain(|_, e| e.abs() > TRACE_FLOOR);
            }
        }

        if done {
            self.traces.clear();
        }
        td_error
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Override exploration, e.g. 0.0 for greedy evaluation
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon;
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    pub fn values(&self) -> &ValueTable {
        &self.q
    }

    pub fn trace(&self, state: &StateKey, action: ScaleAction) -> f64 {
        self.traces.get(&(*state, action)).copied().unwrap_or(0.0)
    }

    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }

    pub fn to_checkpoint(&self) -> AgentCheckpoint {
        let mut values: Vec<ValueEntry> = self
            .q
            .iter()
            .map(|(state, values)| ValueEntry {
                state: *state,
                values: *values,
            })
            .collect();
        values.sort_by(|a, b| a.state.cmp(&b.state));

        let mut traces: Vec<TraceEntry> = self
            .traces
            .iter()
            .map(|((state, action), trace)| TraceEntry {
                state: *state,
                action: *action,
                trace: *trace,
            })
            .collect();
        traces.sort_by(|a, b| a.state.cmp(&b.state).then(a.action.cmp(&b.action)));

        AgentCheckpoint {
            version: CHECKPOINT_VERSION,
            epsilon: self.epsilon,
            episodes: self.episodes,
            values,
            traces,
        }
    }

    pub fn restore(&mut self, checkpoint: AgentCheckpoint) {
        self.q = ValueTable {
            rows: checkpoint
                .values
                .into_iter()
                .map(|entry| (entry.state, entry.values))
                .collect(),
        };
        self.traces = checkpoint
            .traces
            .into_iter()
            .map(|entry| ((entry.state, entry.action), entry.trace))
            .collect();
        self.epsilon = checkpoint.epsilon;
        self.episodes = checkpoint.episodes;
    }
}

impl DecisionPolicy for SarsaAgent {
    fn select_action(&mut self, observation: &Observation) -> ScaleAction {
        let key = self.state_key(observation);
        self.select_for_key(&key)
    }

    fn update(&mut self, transition: &Transition) {
        let state = self.state_key(&transition.observation);
        let next_state = self.state_key(&transition.next_observation);
        self.update_keys(
            state,
            transition.action,
            transition.reward,
            next_state,
            transition.next_action,
            transition.done,
        );
    }

    fn end_episode(&mut self) {
        let schedule = self.config.epsilon;
        self.epsilon = (self.epsilon * schedule.decay).max(schedule.floor);
        self.episodes += 1;
        self.traces.clear();
        debug!(
            episodes = self.episodes,
            epsilon = self.epsilon,
            states = self.q.len(),
            "SARSA episode closed"
        );
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.to_checkpoint().save(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let checkpoint = AgentCheckpoint::load(path)?;
        self.restore(checkpoint);
        Ok(())
    }

    fn is_learning(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "SARSA"
    }
}
