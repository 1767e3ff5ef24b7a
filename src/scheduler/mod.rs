//! Timer abstraction for the single-threaded aggregation core.
//!
//! Every component that ticks owns exactly one [`TimerSlot`]. Setting the slot
//! cancels whatever was pending, so a component never has two ticks in flight.
//! Tasks run on the scheduler's own thread and are never invoked after
//! [`Scheduler::cancel`].
//!
//! - [`ManualScheduler`] -- virtual time, advanced explicitly. Deterministic, used in tests.
//! - `TokioScheduler` (feature `tokio-scheduler`) -- wall-clock timers on a tokio `LocalSet`.

mod manual;
#[cfg(feature = "tokio-scheduler")]
mod tokio_timer;

pub use manual::ManualScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_timer::TokioScheduler;

use crate::window::TimestampMs;

/// Identifier of a scheduled task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Current time in milliseconds since the UNIX epoch.
    fn now(&self) -> TimestampMs;

    /// Run `task` once after `delay_ms` (negative delays run as soon as possible).
    fn schedule(&self, delay_ms: i64, task: Task) -> TimerId;

    /// Cancel a pending task. Unknown or already fired ids are ignored.
    fn cancel(&self, id: TimerId);
}

/// Single-slot holder for the one outstanding timer of a component.
///
/// Each [`TimerSlot::set`] bumps a generation that the task receives; a task
/// checks it with [`TimerSlot::take_fired`] so a timer that was replaced or
/// cancelled turns into a no-op even if the scheduler still runs it.
#[derive(Debug, Default)]
pub struct TimerSlot {
    pending: Option<TimerId>,
    generation: u64,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the pending timer, then schedule the task built by `make` for the new generation.
    pub fn set<F>(&mut self, scheduler: &dyn Scheduler, delay_ms: i64, make: F) -> TimerId
    where
        F: FnOnce(u64) -> Task,
    {
        self.cancel(scheduler);
        let id = scheduler.schedule(delay_ms, make(self.generation));
        self.pending = Some(id);
        id
    }

    pub fn cancel(&mut self, scheduler: &dyn Scheduler) {
        self.generation += 1;
        if let Some(id) = self.pending.take() {
            scheduler.cancel(id);
        }
    }

    /// Called from a firing task: true if `generation` is still current, which releases the slot.
    pub fn take_fired(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && self.generation == generation {
            self.pending = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
