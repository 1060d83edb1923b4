//! Worker lifecycle and drain-safe scale-down
//!
//! Each worker moves through:
//!
//! ```text
//! Provisioning ──ready──► Active ──SYN──► Draining ──ACK──► Terminated
//! ```
//!
//! Scale-up is fast: new workers are marked ready in the same call. Scale-down
//! runs a two-phase handshake:
//!
//! 1. **SYN**: the manager moves the chosen worker to Draining. It stops
//!    accepting tasks but keeps the one it holds.
//! 2. **ACK**: once the worker has handed its task back (or immediately, if
//!    it was idle) it sends a [`DrainAck`] over the manager's channel.
//! 3. The manager marks the worker Terminated only when it consumes the ACK.
//!
//! The reported worker count includes Draining workers, so it never
//! undercounts capacity that is still finishing work.

use std::collections::BTreeMap;

use scalewise_core::{PoolConfig, Result, ScalewiseError, ScaleAction, Task, WorkerState};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Tolerance for comparing simulated timestamps
pub const TIME_EPSILON: f64 = 1e-9;

/// Drain-complete message from a worker to the manager
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainAck {
    pub worker_id: u64,
    /// Simulated time the worker finished draining
    pub at: f64,
}

/// A pool worker holding at most one task
#[derive(Debug)]
pub struct Worker {
    id: u64,
    state: WorkerState,
    current_task: Option<Task>,
    spawned_at: f64,
    drain_requested_at: Option<f64>,
    ack_tx: UnboundedSender<DrainAck>,
}

impl Worker {
    fn new(id: u64, now: f64, ack_tx: UnboundedSender<DrainAck>) -> Self {
        Worker {
            id,
            state: WorkerState::Provisioning,
            current_task: None,
            spawned_at: now,
            drain_requested_at: None,
            ack_tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    pub fn spawned_at(&self) -> f64 {
        self.spawned_at
    }

    pub fn drain_requested_at(&self) -> Option<f64> {
        self.drain_requested_at
    }

    /// Active and not holding a task
    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Active && self.current_task.is_none()
    }

    fn mark_ready(&mut self) {
        if self.state == WorkerState::Provisioning {
            self.state = WorkerState::Active;
        }
    }

    /// SYN: stop accepting work. An idle worker acknowledges right away.
    fn begin_drain(&mut self, now: f64) {
        self.state = WorkerState::Draining;
        self.drain_requested_at = Some(now);
        if self.current_task.is_none() {
            self.acknowledge(now);
        }
    }

    fn acknowledge(&self, at: f64) {
        if self
            .ack_tx
            .send(DrainAck {
                worker_id: self.id,
                at,
            })
            .is_err()
        {
            warn!(worker_id = self.id, "drain ACK dropped: manager channel closed");
        }
    }

    fn assign(&mut self, task: Task) -> std::result::Result<(), Task> {
        if !self.is_idle() {
            return Err(task);
        }
        self.current_task = Some(task);
        Ok(())
    }

    /// Hand back the held task if it finishes by `horizon`.
    /// A Draining worker acknowledges as soon as its task is released.
    fn release_if_finished(&mut self, horizon: f64) -> Option<Task> {
        let finish = self.current_task.as_ref()?.finish_time()?;
        if finish > horizon + TIME_EPSILON {
            return None;
        }
        let task = self.current_task.take();
        if self.state == WorkerState::Draining {
            self.acknowledge(finish);
        }
        task
    }
}

/// Outcome of one `scale` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleReport {
    pub requested: i64,
    /// Delta actually applied after clamping to pool bounds
    pub applied: i64,
    pub spawned: Vec<u64>,
    pub draining: Vec<u64>,
    /// Workers that were idle and terminated within the call
    pub terminated: Vec<u64>,
}

/// Owns worker identities and states, executes scale decisions
pub struct WorkerLifecycleManager {
    pool: PoolConfig,
    workers: BTreeMap<u64, Worker>,
    next_worker_id: u64,
    terminated_total: usize,
    ack_tx: UnboundedSender<DrainAck>,
    ack_rx: UnboundedReceiver<DrainAck>,
}

impl WorkerLifecycleManager {
    pub fn new(pool: PoolConfig) -> Self {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        Self {
            pool,
            workers: BTreeMap::new(),
            next_worker_id: 0,
            terminated_total: 0,
            ack_tx,
            ack_rx,
        }
    }

    /// Drop every worker and start over with `initial` Active workers.
    /// Worker ids keep increasing across resets.
    pub fn reset(&mut self, initial: usize, now: f64) -> Result<()> {
        self.workers.clear();
        while self.ack_rx.try_recv().is_ok() {}
        self.terminated_total = 0;

        let initial = initial.clamp(self.pool.min_workers, self.pool.max_workers);
        for _ in 0..initial {
            self.spawn(now)?;
        }
        Ok(())
    }

    /// Scaling capability: apply one action and return the new reported count
    pub fn apply(&mut self, action: ScaleAction, now: f64) -> Result<usize> {
        self.scale(action.delta(), now)?;
        Ok(self.reported_count())
    }

    /// Add or drain workers. Out-of-range requests are clamped, never rejected.
    pub fn scale(&mut self, delta: i64, now: f64) -> Result<ScaleReport> {
        let mut report = ScaleReport {
            requested: delta,
            ..Default::default()
        };

        if delta > 0 {
            let room = self.pool.max_workers.saturating_sub(self.reported_count());
            let count = (delta as usize).min(room);
            if count < delta as usize {
                debug!(requested = delta, applied = count, "scale-up clamped at max_workers");
            }
            for _ in 0..count {
                report.spawned.push(self.spawn(now)?);
            }
            report.applied = count as i64;
        } else if delta < 0 {
            let removable = self.committed_count().saturating_sub(self.pool.min_workers);
            let count = (delta.unsigned_abs() as usize).min(removable);
            if count < delta.unsigned_abs() as usize {
                debug!(requested = delta, applied = -(count as i64), "scale-down clamped at min_workers");
            }
            for worker_id in self.drain_candidates().into_iter().take(count) {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.begin_drain(now);
                    info!(
                        worker_id,
                        task_id = worker.current_task().map(|t| t.id),
                        "drain requested (SYN)"
                    );
                    report.draining.push(worker_id);
                }
            }
            report.applied = -(count as i64);
            report.terminated = self.process_acks()?;
        }

        Ok(report)
    }

    /// Consume pending ACKs and retire their workers. Returns the terminated ids.
    pub fn process_acks(&mut self) -> Result<Vec<u64>> {
        let mut terminated = Vec::new();
        while let Ok(ack) = self.ack_rx.try_recv() {
            let Some(worker) = self.workers.get(&ack.worker_id) else {
                warn!(worker_id = ack.worker_id, "ACK from unknown worker ignored");
                continue;
            };
            if worker.state != WorkerState::Draining || worker.current_task.is_some() {
                warn!(
                    worker_id = ack.worker_id,
                    state = ?worker.state,
                    "ACK from worker that is not drained, ignored"
                );
                continue;
            }
            let waited = ack.at - worker.drain_requested_at.unwrap_or(ack.at);
            self.workers.remove(&ack.worker_id);
            self.terminated_total += 1;
            info!(worker_id = ack.worker_id, waited_secs = waited, "worker terminated (ACK)");
            terminated.push(ack.worker_id);
        }
        Ok(terminated)
    }

    /// Fail if any Draining worker has exceeded the drain timeout at `now`
    pub fn check_drain_deadlines(&self, now: f64) -> Result<()> {
        for worker in self.workers.values() {
            if worker.state != WorkerState::Draining {
                continue;
            }
            let requested = worker.drain_requested_at.unwrap_or(now);
            let waited = now - requested;
            if waited > self.pool.drain_timeout_secs + TIME_EPSILON {
                return Err(ScalewiseError::WorkerDrainTimeout {
                    worker_id: worker.id,
                    task_id: worker.current_task.as_ref().map(|t| t.id),
                    waited_secs: waited,
                });
            }
        }
        Ok(())
    }

    /// Give `task` to an idle Active worker; returns the task if the worker cannot take it
    pub fn assign(&mut self, worker_id: u64, task: Task) -> std::result::Result<(), Task> {
        match self.workers.get_mut(&worker_id) {
            Some(worker) => worker.assign(task),
            None => Err(task),
        }
    }

    /// Take every task finishing by `horizon` off its worker, in completion order
    pub fn release_finished(&mut self, horizon: f64) -> Vec<Task> {
        let mut finished: Vec<Task> = self
            .workers
            .values_mut()
            .filter_map(|w| w.release_if_finished(horizon))
            .collect();
        finished.sort_by(|a, b| {
            let fa = a.finish_time().unwrap_or(f64::MAX);
            let fb = b.finish_time().unwrap_or(f64::MAX);
            fa.total_cmp(&fb).then(a.id.cmp(&b.id))
        });
        finished
    }

    /// Earliest finish time among tasks held by workers
    pub fn next_finish_time(&self) -> Option<f64> {
        self.workers
            .values()
            .filter_map(|w| w.current_task.as_ref()?.finish_time())
            .min_by(f64::total_cmp)
    }

    /// Active idle workers, lowest id first
    pub fn idle_worker_ids(&self) -> Vec<u64> {
        self.workers
            .values()
            .filter(|w| w.is_idle())
            .map(|w| w.id)
            .collect()
    }

    /// Every non-Terminated worker (the externally reported count)
    pub fn reported_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers not on their way out (Provisioning or Active)
    pub fn committed_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| matches!(w.state, WorkerState::Provisioning | WorkerState::Active))
            .count()
    }

    pub fn count_in(&self, state: WorkerState) -> usize {
        if state == WorkerState::Terminated {
            return self.terminated_total;
        }
        self.workers.values().filter(|w| w.state == state).count()
    }

    /// Tasks currently held by workers
    pub fn in_flight(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.current_task.is_some())
            .count()
    }

    pub fn worker(&self, worker_id: u64) -> Option<&Worker> {
        self.workers.get(&worker_id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Ids only grow, so a collision means the allocator was corrupted
    fn spawn(&mut self, now: f64) -> Result<u64> {
        let worker_id = self.next_worker_id;
        if self.workers.contains_key(&worker_id) {
            return Err(ScalewiseError::WorkerIdentityReuse { worker_id });
        }
        self.next_worker_id += 1;

        let mut worker = Worker::new(worker_id, now, self.ack_tx.clone());
        worker.mark_ready();
        self.workers.insert(worker_id, worker);
        debug!(worker_id, "worker provisioned and active");
        Ok(worker_id)
    }

    /// Active workers in drain order: idle first, then newest first
    fn drain_candidates(&self) -> Vec<u64> {
        let mut candidates: Vec<&Worker> = self
            .workers
            .values()
            .filter(|w| w.state == WorkerState::Active)
            .collect();
        candidates.sort_by(|a, b| {
            b.is_idle()
                .cmp(&a.is_idle())
                .then(b.id.cmp(&a.id))
        });
        candidates.into_iter().map(|w| w.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            initial_workers: min,
            drain_timeout_secs: 10.0,
        }
    }

    fn busy_task(id: u64, start: f64, processing: f64) -> Task {
        let mut task = Task::new(id, start, processing, 2.0);
        task.start_time = Some(start);
        task
    }

    #[test]
    fn test_scale_up_is_immediately_active() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 4));
        manager.reset(1, 0.0).unwrap();

        let report = manager.scale(2, 0.0).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(manager.count_in(WorkerState::Active), 3);
        assert_eq!(manager.count_in(WorkerState::Provisioning), 0);
        assert_eq!(manager.idle_worker_ids().len(), 3);
    }

    #[test]
    fn test_scale_is_clamped_to_bounds() {
        let mut manager = WorkerLifecycleManager::new(pool(1, 3));
        manager.reset(2, 0.0).unwrap();

        assert_eq!(manager.scale(5, 0.0).unwrap().applied, 1);
        assert_eq!(manager.reported_count(), 3);

        assert_eq!(manager.scale(-5, 0.0).unwrap().applied, -2);
        assert_eq!(manager.reported_count(), 1);
    }

    #[test]
    fn test_idle_worker_drains_immediately() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 2));
        manager.reset(1, 0.0).unwrap();

        let report = manager.scale(-1, 0.0).unwrap();
        assert_eq!(report.terminated, vec![0]);
        assert_eq!(manager.reported_count(), 0);
        assert_eq!(manager.count_in(WorkerState::Terminated), 1);
    }

    #[test]
    fn test_idle_workers_drain_first() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 3));
        manager.reset(3, 0.0).unwrap();
        manager.assign(2, busy_task(1, 0.0, 5.0)).unwrap();

        let report = manager.scale(-1, 0.0).unwrap();
        assert_eq!(report.draining, vec![1]);
        assert!(manager.worker(2).is_some());
    }

    #[test]
    fn test_busy_worker_acks_after_release() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 1));
        manager.reset(1, 0.0).unwrap();
        manager.assign(0, busy_task(9, 0.0, 3.0)).unwrap();

        let report = manager.scale(-1, 0.0).unwrap();
        assert_eq!(report.draining, vec![0]);
        assert!(report.terminated.is_empty());
        assert_eq!(manager.reported_count(), 1);
        assert_eq!(manager.count_in(WorkerState::Draining), 1);

        // Draining workers take no new work
        assert!(manager.assign(0, busy_task(10, 0.0, 1.0)).is_err());

        assert!(manager.release_finished(2.0).is_empty());
        assert!(manager.process_acks().unwrap().is_empty());

        let released = manager.release_finished(3.0);
        assert_eq!(released.len(), 1);
        assert_eq!(manager.process_acks().unwrap(), vec![0]);
        assert_eq!(manager.reported_count(), 0);
    }

    #[test]
    fn test_drain_timeout_is_fatal() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 1));
        manager.reset(1, 0.0).unwrap();
        manager.assign(0, busy_task(4, 0.0, 50.0)).unwrap();
        manager.scale(-1, 0.0).unwrap();

        manager.check_drain_deadlines(10.0).unwrap();
        let err = manager.check_drain_deadlines(11.0).unwrap_err();
        match err {
            ScalewiseError::WorkerDrainTimeout { worker_id, task_id, .. } => {
                assert_eq!(worker_id, 0);
                assert_eq!(task_id, Some(4));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_worker_ids_are_never_reused() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 2));
        manager.reset(1, 0.0).unwrap();
        manager.scale(-1, 0.0).unwrap();
        let report = manager.scale(1, 1.0).unwrap();
        assert_eq!(report.spawned, vec![1]);

        manager.reset(2, 0.0).unwrap();
        let ids: Vec<u64> = manager.workers().map(|w| w.id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_draining_worker_counts_toward_max() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 2));
        manager.reset(2, 0.0).unwrap();
        manager.assign(0, busy_task(1, 0.0, 5.0)).unwrap();
        manager.assign(1, busy_task(2, 0.0, 5.0)).unwrap();

        manager.scale(-1, 0.0).unwrap();
        // Draining worker still counts, so there is no room to grow
        assert_eq!(manager.scale(1, 0.0).unwrap().applied, 0);
        assert_eq!(manager.reported_count(), 2);
    }

    #[test]
    fn test_apply_reports_count_until_ack() {
        let mut manager = WorkerLifecycleManager::new(pool(1, 3));
        manager.reset(1, 0.0).unwrap();

        assert_eq!(manager.apply(ScaleAction::Up, 0.0).unwrap(), 2);
        assert_eq!(manager.apply(ScaleAction::Hold, 0.0).unwrap(), 2);
        assert_eq!(manager.apply(ScaleAction::Up, 0.0).unwrap(), 3);
        assert_eq!(manager.apply(ScaleAction::Up, 0.0).unwrap(), 3);

        for id in 0..3 {
            manager.assign(id, busy_task(id, 0.0, 2.0)).unwrap();
        }
        // Busy victim keeps counting while it drains
        assert_eq!(manager.apply(ScaleAction::Down, 1.0).unwrap(), 3);
        assert_eq!(manager.count_in(WorkerState::Draining), 1);

        assert_eq!(manager.release_finished(2.0).len(), 3);
        assert_eq!(manager.process_acks().unwrap().len(), 1);
        assert_eq!(manager.apply(ScaleAction::Hold, 2.0).unwrap(), 2);
    }

    #[test]
    fn test_colliding_worker_id_is_rejected() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 3));
        manager.reset(1, 0.0).unwrap();
        manager.next_worker_id = 0;

        let err = manager.scale(1, 0.0).unwrap_err();
        assert!(matches!(err, ScalewiseError::WorkerIdentityReuse { worker_id: 0 }));
        assert_eq!(manager.reported_count(), 1);
    }

    #[test]
    fn test_next_finish_time_is_earliest_held_task() {
        let mut manager = WorkerLifecycleManager::new(pool(0, 3));
        manager.reset(3, 0.0).unwrap();
        assert_eq!(manager.next_finish_time(), None);

        manager.assign(0, busy_task(1, 0.0, 3.0)).unwrap();
        manager.assign(2, busy_task(2, 0.5, 1.0)).unwrap();
        assert_eq!(manager.next_finish_time(), Some(1.5));
    }
}
