//! Step-based pipeline simulator
//!
//! Advances the image-processing pipeline one control interval at a time:
//!
//! ```text
//! arrivals ─► input ─► worker ─► [Active worker] ─► result ─► output
//! ```
//!
//! Every task is held by exactly one queue or one worker. After each step the
//! simulator checks task conservation and rebuilds the observation from a
//! trailing window of per-step samples.

use std::collections::VecDeque;
use std::time::Duration;

use scalewise_core::{
    Observation, PoolConfig, QueueFacade, QueueName, Result, ScaleAction, ScalewiseError,
    SimulationConfig, Task, WorkloadSource,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::workers::{ScaleReport, WorkerLifecycleManager, TIME_EPSILON};

/// What happened during one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_index: usize,
    /// Simulated time at the end of the step
    pub time: f64,
    pub action: ScaleAction,
    /// Worker delta actually applied after clamping
    pub applied_delta: i64,
    pub arrivals: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub qos_met: usize,
    pub prev_qos_rate: f64,
    pub qos_rate: f64,
    /// Tasks waiting in the input and worker queues
    pub queue_depth: usize,
    pub active_workers: usize,
    pub terminated_workers: Vec<u64>,
}

/// Observation, outcome and termination flag returned by [`PipelineSimulator::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub outcome: StepOutcome,
    pub done: bool,
}

/// A task that reached the output queue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub task_id: u64,
    pub completion_time: f64,
    pub deadline: f64,
    pub qos_met: bool,
}

#[derive(Debug, Clone, Default)]
struct WindowSample {
    arrivals: usize,
    processing_times: Vec<f64>,
    qos_met: usize,
}

/// Trailing per-step statistics
#[derive(Debug)]
struct RollingWindow {
    capacity: usize,
    samples: VecDeque<WindowSample>,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, sample: WindowSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    /// (avg processing time, max processing time, arrivals/s, qos rate).
    /// The qos rate is `None` when nothing completed inside the window.
    fn stats(&self, step_duration: f64) -> (f64, f64, f64, Option<f64>) {
        let completed: usize = self.samples.iter().map(|s| s.processing_times.len()).sum();
        let met: usize = self.samples.iter().map(|s| s.qos_met).sum();
        let arrivals: usize = self.samples.iter().map(|s| s.arrivals).sum();
        let times = self.samples.iter().flat_map(|s| s.processing_times.iter().copied());

        let (sum, max) = times.fold((0.0, 0.0_f64), |(sum, max), t| (sum + t, max.max(t)));
        let avg = if completed > 0 { sum / completed as f64 } else { 0.0 };
        let span = self.samples.len() as f64 * step_duration;
        let arrival_rate = if span > 0.0 { arrivals as f64 / span } else { 0.0 };
        let qos_rate = (completed > 0).then(|| met as f64 / completed as f64);
        (avg, max, arrival_rate, qos_rate)
    }
}

/// Pipeline simulator owning the queues, the workload and the worker pool
pub struct PipelineSimulator {
    config: SimulationConfig,
    queues: Box<dyn QueueFacade>,
    workload: Box<dyn WorkloadSource>,
    workers: WorkerLifecycleManager,
    window: RollingWindow,
    step_index: usize,
    current_time: f64,
    next_task_id: u64,
    generated: usize,
    completions: Vec<CompletionRecord>,
    qos_rate: f64,
}

impl PipelineSimulator {
    pub fn new(
        config: SimulationConfig,
        pool: PoolConfig,
        queues: Box<dyn QueueFacade>,
        workload: Box<dyn WorkloadSource>,
    ) -> Self {
        let window = RollingWindow::new(config.observation_window.max(1));
        PipelineSimulator {
            config,
            queues,
            workload,
            workers: WorkerLifecycleManager::new(pool),
            window,
            step_index: 0,
            current_time: 0.0,
            next_task_id: 0,
            generated: 0,
            completions: Vec::new(),
            qos_rate: 1.0,
        }
    }

    /// Start a new episode with `initial_workers` Active workers
    pub fn reset(&mut self, initial_workers: usize) -> Result<Observation> {
        self.queues.clear();
        self.workload.reset();
        self.workers.reset(initial_workers, 0.0)?;
        self.window.clear();
        self.step_index = 0;
        self.current_time = 0.0;
        self.next_task_id = 0;
        self.generated = 0;
        self.completions.clear();
        self.qos_rate = 1.0;

        debug!(workers = self.workers.reported_count(), "simulator reset");
        Ok(self.observe())
    }

    /// Apply `action` and advance one interval
    pub fn step(&mut self, action: ScaleAction) -> Result<StepResult> {
        let now = self.current_time;
        let end = (self.step_index + 1) as f64 * self.config.step_duration_secs;
        let prev_qos_rate = self.qos_rate;

        let report: ScaleReport = self.workers.scale(action.delta(), now)?;

        let arrivals = self.ingest(now);
        self.transfer(QueueName::Input, QueueName::Worker, self.config.dispatch_batch_size)?;
        let mut dispatched = self.dispatch(now)?;

        let mut sample = WindowSample {
            arrivals,
            ..Default::default()
        };
        // Workers freed inside the interval pick up queued work at their finish time.
        // Completed tasks reach the result queue before their worker's ACK is consumed.
        while let Some(finish) = self
            .workers
            .next_finish_time()
            .filter(|t| *t <= end + TIME_EPSILON)
        {
            for mut task in self.workers.release_finished(finish) {
                let finished_at = task.finish_time().unwrap_or(finish);
                if task.complete(finished_at)? {
                    sample.qos_met += 1;
                }
                sample.processing_times.push(task.processing_time);
                self.queues.push(QueueName::Result, task);
            }
            dispatched += self.dispatch(finish)?;
        }
        let completed = sample.processing_times.len();
        let qos_met = sample.qos_met;

        let mut terminated_workers = report.terminated;
        terminated_workers.extend(self.workers.process_acks()?);
        self.workers.check_drain_deadlines(end)?;

        self.collect()?;

        self.step_index += 1;
        self.current_time = end;
        self.verify_conservation()?;

        self.window.push(sample);
        let observation = self.observe();
        self.qos_rate = observation.qos_rate;

        let drained = self.workload.is_exhausted(end)
            && self.queues.len(QueueName::Output) == self.generated;
        let done = drained || self.step_index >= self.config.max_steps;
        if done {
            info!(
                steps = self.step_index,
                generated = self.generated,
                delivered = self.queues.len(QueueName::Output),
                budget_exhausted = !drained,
                "episode finished"
            );
        }

        let outcome = StepOutcome {
            step_index: self.step_index - 1,
            time: end,
            action,
            applied_delta: report.applied,
            arrivals,
            dispatched,
            completed,
            qos_met,
            prev_qos_rate,
            qos_rate: observation.qos_rate,
            queue_depth: self.queues.len(QueueName::Input) + self.queues.len(QueueName::Worker),
            active_workers: self.workers.reported_count(),
            terminated_workers,
        };
        debug!(
            step = outcome.step_index,
            action = %action,
            arrivals,
            dispatched,
            completed,
            queue_depth = outcome.queue_depth,
            workers = outcome.active_workers,
            qos_rate = outcome.qos_rate,
            "step"
        );

        Ok(StepResult {
            observation,
            outcome,
            done,
        })
    }

    /// Current observation (pure read)
    pub fn observe(&self) -> Observation {
        let (avg, max, arrival_rate, qos_rate) = self.window.stats(self.config.step_duration_secs);
        Observation {
            input_q_len: self.queues.len(QueueName::Input) as f64,
            worker_q_len: self.queues.len(QueueName::Worker) as f64,
            result_q_len: self.queues.len(QueueName::Result) as f64,
            output_q_len: self.queues.len(QueueName::Output) as f64,
            active_worker_count: self.workers.reported_count() as f64,
            avg_processing_time: avg,
            max_processing_time: max,
            arrival_rate,
            // A quiet window keeps the last measured rate
            qos_rate: qos_rate.unwrap_or(self.qos_rate),
        }
    }

    pub fn workers(&self) -> &WorkerLifecycleManager {
        &self.workers
    }

    pub fn queue_len(&self, queue: QueueName) -> usize {
        self.queues.len(queue)
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Tasks created so far this episode
    pub fn generated(&self) -> usize {
        self.generated
    }

    /// Tasks delivered to the output queue, in delivery order
    pub fn completions(&self) -> &[CompletionRecord] {
        &self.completions
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.config.queue_pop_timeout_ms)
    }

    /// Pop, treating a timeout as an empty queue
    fn pop_or_empty(&mut self, queue: QueueName) -> Result<Option<Task>> {
        match self.queues.pop(queue, self.pop_timeout()) {
            Ok(task) => Ok(Some(task)),
            Err(ScalewiseError::QueueTimeout { queue, timeout }) => {
                debug!(%queue, ?timeout, "queue pop timed out, treating as empty");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn ingest(&mut self, now: f64) -> usize {
        let arrivals = self
            .workload
            .next_arrivals(now, self.config.step_duration_secs);
        let count = arrivals.len();
        for arrival in arrivals {
            let task = Task::from_arrival(self.next_task_id, now, arrival);
            self.next_task_id += 1;
            self.generated += 1;
            self.queues.push(QueueName::Input, task);
        }
        count
    }

    fn transfer(&mut self, from: QueueName, to: QueueName, limit: Option<usize>) -> Result<usize> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut moved = 0;
        while moved < limit && !self.queues.is_empty(from) {
            let Some(task) = self.pop_or_empty(from)? else {
                break;
            };
            self.queues.push(to, task);
            moved += 1;
        }
        Ok(moved)
    }

    /// Hand one queued task to each idle Active worker
    fn dispatch(&mut self, now: f64) -> Result<usize> {
        let mut dispatched = 0;
        for worker_id in self.workers.idle_worker_ids() {
            if self.queues.is_empty(QueueName::Worker) {
                break;
            }
            let Some(mut task) = self.pop_or_empty(QueueName::Worker)? else {
                break;
            };
            task.start_time = Some(now);
            match self.workers.assign(worker_id, task) {
                Ok(()) => dispatched += 1,
                Err(mut task) => {
                    task.start_time = None;
                    self.queues.push(QueueName::Worker, task);
                }
            }
        }
        Ok(dispatched)
    }

    /// Move results to the output queue, recording each delivery
    fn collect(&mut self) -> Result<()> {
        let limit = self.config.collect_batch_size.unwrap_or(usize::MAX);
        let mut moved = 0;
        while moved < limit && !self.queues.is_empty(QueueName::Result) {
            let Some(task) = self.pop_or_empty(QueueName::Result)? else {
                break;
            };
            if let (Some(completion_time), Some(qos_met)) = (task.completion_time, task.qos_met) {
                self.completions.push(CompletionRecord {
                    task_id: task.id,
                    completion_time,
                    deadline: task.deadline,
                    qos_met,
                });
            }
            self.queues.push(QueueName::Output, task);
            moved += 1;
        }
        Ok(())
    }

    /// generated == queued + in flight, every step
    fn verify_conservation(&self) -> Result<()> {
        let queued: usize = QueueName::ALL.iter().map(|&q| self.queues.len(q)).sum();
        let accounted = queued + self.workers.in_flight();
        if accounted != self.generated {
            return Err(ScalewiseError::TaskConservation {
                generated: self.generated,
                accounted,
            });
        }
        Ok(())
    }
}
