//! In-memory queue transport
//!
//! Reference [`QueueFacade`] backed by one `VecDeque` per named queue. The
//! simulator is the only producer, so a pop on an empty queue can never be
//! satisfied by waiting: it reports the timeout straight away.

use std::collections::VecDeque;
use std::time::Duration;

use scalewise_core::{QueueFacade, QueueName, Result, ScalewiseError, Task};

#[derive(Debug, Default)]
pub struct InMemoryQueues {
    queues: [VecDeque<Task>; 4],
}

impl InMemoryQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(queue: QueueName) -> usize {
        match queue {
            QueueName::Input => 0,
            QueueName::Worker => 1,
            QueueName::Result => 2,
            QueueName::Output => 3,
        }
    }

    /// Tasks currently held by `queue`, head first
    pub fn tasks(&self, queue: QueueName) -> impl Iterator<Item = &Task> {
        self.queues[Self::slot(queue)].iter()
    }
}

impl QueueFacade for InMemoryQueues {
    fn push(&mut self, queue: QueueName, task: Task) {
        self.queues[Self::slot(queue)].push_back(task);
    }

    fn pop(&mut self, queue: QueueName, timeout: Duration) -> Result<Task> {
        self.queues[Self::slot(queue)]
            .pop_front()
            .ok_or(ScalewiseError::QueueTimeout { queue, timeout })
    }

    fn len(&self, queue: QueueName) -> usize {
        self.queues[Self::slot(queue)].len()
    }

    fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_per_queue() {
        let mut queues = InMemoryQueues::new();
        queues.push(QueueName::Input, Task::new(1, 0.0, 1.0, 2.0));
        queues.push(QueueName::Input, Task::new(2, 0.0, 1.0, 2.0));
        queues.push(QueueName::Output, Task::new(3, 0.0, 1.0, 2.0));

        assert_eq!(queues.len(QueueName::Input), 2);
        assert_eq!(queues.len(QueueName::Output), 1);
        assert!(queues.is_empty(QueueName::Worker));

        let first = queues.pop(QueueName::Input, Duration::ZERO).unwrap();
        assert_eq!(first.id, 1);
    }

    #[test]
    fn test_empty_pop_times_out() {
        let mut queues = InMemoryQueues::new();
        let err = queues
            .pop(QueueName::Result, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(
            err,
            ScalewiseError::QueueTimeout { queue: QueueName::Result, .. }
        ));
        assert!(!err.is_fatal());
    }
}
