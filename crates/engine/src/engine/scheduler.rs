//! Delay timers.
//!
//! DELAYED tasks are released by a single scheduler loop over a min-heap
//! of `(fire_at, task_execution_id)`. The loop never holds a transaction;
//! it only emits task ids whose deadline has passed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Min-heap of pending timers.
#[derive(Debug, Default)]
pub struct DelayQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fire_at: DateTime<Utc>, task_execution_id: Uuid) {
        self.heap.push(Reverse((fire_at, task_execution_id)));
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = self.heap.peek() {
            if *at > now {
                break;
            }
            due.push(*id);
            self.heap.pop();
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// A request to release a task at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDelay {
    pub task_execution_id: Uuid,
    pub fire_at: DateTime<Utc>,
}

/// Cloneable handle for scheduling timers.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    tx: mpsc::UnboundedSender<ScheduledDelay>,
}

impl TaskScheduler {
    /// Create a handle and the receiver a [`SchedulerLoop`] consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduledDelay>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn schedule(&self, task_execution_id: Uuid, fire_at: DateTime<Utc>) {
        let request = ScheduledDelay {
            task_execution_id,
            fire_at,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!(%task_execution_id, "Scheduler stopped, timer dropped");
        }
    }
}

/// Sleeps until the next deadline and emits due task ids.
pub struct SchedulerLoop {
    queue: DelayQueue,
    requests: mpsc::UnboundedReceiver<ScheduledDelay>,
    fired: mpsc::UnboundedSender<Uuid>,
}

impl SchedulerLoop {
    pub fn new(
        requests: mpsc::UnboundedReceiver<ScheduledDelay>,
        fired: mpsc::UnboundedSender<Uuid>,
    ) -> Self {
        Self {
            queue: DelayQueue::new(),
            requests,
            fired,
        }
    }

    /// Run until the request channel closes and every timer has fired,
    /// or the fired channel closes.
    pub async fn run(mut self) {
        let mut open = true;
        loop {
            let now = Utc::now();
            for id in self.queue.pop_due(now) {
                if self.fired.send(id).is_err() {
                    return;
                }
            }

            let wait = self
                .queue
                .next_deadline()
                .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));
            if !open && wait.is_none() {
                return;
            }

            tokio::select! {
                request = self.requests.recv(), if open => match request {
                    Some(r) => self.queue.push(r.fire_at, r.task_execution_id),
                    None => open = false,
                },
                _ = tokio::time::sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {}
            }
        }
    }
}
