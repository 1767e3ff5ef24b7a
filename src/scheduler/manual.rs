use super::{Scheduler, Task, TimerId};
use crate::window::TimestampMs;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// Virtual-time scheduler.
///
/// Time only moves through [`ManualScheduler::advance`] or
/// [`ManualScheduler::advance_to`], which run due tasks in deadline order
/// (ties in scheduling order). Tasks may schedule or cancel other tasks.
pub struct ManualScheduler {
    inner: RefCell<ManualInner>,
}

struct ManualInner {
    now: TimestampMs,
    next_id: u64,
    queue: BTreeMap<(TimestampMs, u64), Task>,
    due: HashMap<u64, TimestampMs>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new(start: TimestampMs) -> Self {
        Self {
            inner: RefCell::new(ManualInner { now: start, next_id: 1, queue: BTreeMap::new(), due: HashMap::new() }),
        }
    }

    /// Move time forward by `ms`, running every task that falls due.
    pub fn advance(&self, ms: i64) -> usize {
        let target = self.inner.borrow().now + ms;
        self.advance_to(target)
    }

    /// Move time to `target`, running every task due at or before it. Returns the number of tasks run.
    pub fn advance_to(&self, target: TimestampMs) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let key = match inner.queue.first_key_value() {
                    Some((&(due, id), _)) if due <= target => (due, id),
                    _ => break,
                };
                inner.due.remove(&key.1);
                inner.now = inner.now.max(key.0);
                inner.queue.remove(&key)
            };
            if let Some(task) = next {
                task();
                ran += 1;
            }
        }
        let mut inner = self.inner.borrow_mut();
        inner.now = inner.now.max(target);
        ran
    }

    /// Run tasks already due at the current time.
    pub fn run_due(&self) -> usize {
        let now = self.inner.borrow().now;
        self.advance_to(now)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Deadline of the earliest pending task.
    #[must_use]
    pub fn next_due(&self) -> Option<TimestampMs> {
        self.inner.borrow().queue.first_key_value().map(|(&(due, _), _)| due)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> TimestampMs {
        self.inner.borrow().now
    }

    fn schedule(&self, delay_ms: i64, task: Task) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let due = inner.now + delay_ms.max(0);
        inner.queue.insert((due, id), task);
        inner.due.insert(id, due);
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            inner.due.remove(&id.0).and_then(|due| inner.queue.remove(&(due, id.0)))
        };
        // dropped outside the borrow: the task may own handles that cancel in Drop
        drop(removed);
    }
}
