//! In-memory transport for tests.

use crate::error::TransportError;
use crate::transport::{
    CommandId, SubscriptionHandle, SubscriptionUpdate, TelemetryCommand, TelemetrySubscriber, Transport,
};
use crate::window::SeriesBatch;
use std::cell::RefCell;
use std::rc::Rc;

/// A [`Transport`] that keeps subscribers in memory.
///
/// Every command sent (on subscribe, on reconnect and on unsubscribe) is
/// appended to a log. Updates are pushed by command id; the mock finds the
/// subscriber that owns the id.
#[derive(Default)]
pub struct MockTransport {
    inner: RefCell<MockInner>,
}

#[derive(Default)]
struct MockInner {
    next_handle: u64,
    subscribers: Vec<(SubscriptionHandle, Rc<dyn TelemetrySubscriber>)>,
    sent: Vec<TelemetryCommand>,
    reject_next: Option<String>,
    pending_commands: bool,
    open: bool,
    opens: usize,
    closes: usize,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next subscribe with `reason`.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.inner.borrow_mut().reject_next = Some(reason.into());
    }

    /// What [`Transport::has_pending_commands`] reports.
    pub fn set_pending_commands(&self, pending: bool) {
        self.inner.borrow_mut().pending_commands = pending;
    }

    /// Push a data update for `cmd_id`. Returns false when no subscriber owns the id.
    pub fn deliver(&self, cmd_id: CommandId, data: SeriesBatch) -> bool {
        self.push(SubscriptionUpdate::data(cmd_id, data))
    }

    pub fn deliver_error(&self, cmd_id: CommandId, error_code: i32, message: &str) -> bool {
        self.push(SubscriptionUpdate::error(cmd_id, error_code, message))
    }

    pub fn push(&self, update: SubscriptionUpdate) -> bool {
        let Some(subscriber) = self.owner_of(update.subscription_id) else {
            return false;
        };
        subscriber.on_update(update);
        true
    }

    /// Simulate a dropped and re-established connection.
    ///
    /// Each subscriber is told about the reconnect first, then its (possibly
    /// rewritten) commands are sent again.
    pub fn reconnect(&self) {
        let subscribers = self.subscribers();
        for subscriber in &subscribers {
            subscriber.on_reconnected();
        }
        let mut inner = self.inner.borrow_mut();
        inner.open = true;
        for subscriber in &subscribers {
            inner.sent.extend(subscriber.commands());
        }
    }

    /// Every command sent so far, in order.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<TelemetryCommand> {
        self.inner.borrow().sent.clone()
    }

    /// Commands currently held by live subscribers.
    #[must_use]
    pub fn active_commands(&self) -> Vec<TelemetryCommand> {
        self.subscribers().iter().flat_map(|s| s.commands()).collect()
    }

    /// Id of the most recently sent subscribe or history command.
    #[must_use]
    pub fn last_command_id(&self) -> Option<CommandId> {
        self.inner.borrow().sent.last().map(TelemetryCommand::cmd_id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    /// Number of times the connection was opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.borrow().opens
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.borrow().closes
    }

    fn subscribers(&self) -> Vec<Rc<dyn TelemetrySubscriber>> {
        self.inner.borrow().subscribers.iter().map(|(_, s)| Rc::clone(s)).collect()
    }

    fn owner_of(&self, cmd_id: CommandId) -> Option<Rc<dyn TelemetrySubscriber>> {
        self.subscribers()
            .into_iter()
            .find(|s| s.commands().iter().any(|c| c.cmd_id() == cmd_id))
    }
}

impl Transport for MockTransport {
    fn subscribe(&self, subscriber: Rc<dyn TelemetrySubscriber>) -> Result<SubscriptionHandle, TransportError> {
        let commands = subscriber.commands();
        let mut inner = self.inner.borrow_mut();
        if let Some(reason) = inner.reject_next.take() {
            return Err(TransportError::Rejected(reason));
        }
        if !inner.open {
            inner.open = true;
            inner.opens += 1;
        }
        inner.next_handle += 1;
        let handle = SubscriptionHandle(inner.next_handle);
        inner.sent.extend(commands);
        inner.subscribers.push((handle, subscriber));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let pos = inner.subscribers.iter().position(|(h, _)| *h == handle);
            pos.map(|i| inner.subscribers.remove(i).1)
        };
        if let Some(subscriber) = removed {
            let cancels: Vec<TelemetryCommand> =
                subscriber.commands().iter().filter_map(TelemetryCommand::to_unsubscribe).collect();
            self.inner.borrow_mut().sent.extend(cancels);
        }
    }

    fn has_pending_commands(&self) -> bool {
        self.inner.borrow().pending_commands
    }

    fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.open = false;
        inner.closes += 1;
    }
}
