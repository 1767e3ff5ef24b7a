use super::{Scheduler, Task, TimerId};
use crate::window::TimestampMs;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wall-clock scheduler backed by tokio timers.
///
/// Tasks are spawned with `tokio::task::spawn_local`, so scheduling must
/// happen inside a `tokio::task::LocalSet`. Time is measured on tokio's
/// clock, which makes paused-time tests work unchanged.
pub struct TokioScheduler {
    origin: Instant,
    epoch_at_origin: TimestampMs,
    inner: Rc<RefCell<TokioInner>>,
}

#[derive(Default)]
struct TokioInner {
    next_id: u64,
    handles: HashMap<u64, JoinHandle<()>>,
}

impl TokioScheduler {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new() -> Self {
        let epoch_at_origin = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as TimestampMs;
        Self { origin: Instant::now(), epoch_at_origin, inner: Rc::new(RefCell::new(TokioInner::default())) }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().handles.len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> TimestampMs {
        self.epoch_at_origin + self.origin.elapsed().as_millis() as TimestampMs
    }

    #[allow(clippy::cast_sign_loss)]
    fn schedule(&self, delay_ms: i64, task: Task) -> TimerId {
        let id = {
            let mut inner = self.inner.borrow_mut();
            inner.next_id += 1;
            inner.next_id
        };
        let inner = Rc::clone(&self.inner);
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            inner.borrow_mut().handles.remove(&id);
            task();
        });
        self.inner.borrow_mut().handles.insert(id, handle);
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        let handle = self.inner.borrow_mut().handles.remove(&id.0);
        if let Some(h) = handle {
            h.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, h) in self.inner.borrow_mut().handles.drain() {
            h.abort();
        }
    }
}
