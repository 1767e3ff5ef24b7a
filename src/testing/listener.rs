//! A listener that records what it receives.

use crate::config::SubscriptionTimewindow;
use crate::descriptor::SubscriptionDescriptor;
use crate::error::SubscriptionError;
use crate::listener::DatasourceListener;
use crate::window::Sample;
use std::cell::RefCell;
use std::rc::Rc;

/// One `data_updated` call.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedUpdate {
    pub data: Vec<Sample>,
    pub datasource_index: usize,
    pub data_key_index: usize,
    pub should_apply: bool,
}

type TimewindowFn = Box<dyn Fn() -> SubscriptionTimewindow>;

/// Records updates and errors; answers realtime-window requests from a closure.
///
/// Without a closure, [`DatasourceListener::update_realtime_subscription`]
/// returns the timewindow of the descriptor unchanged.
pub struct RecordingListener {
    descriptor: RefCell<SubscriptionDescriptor>,
    datasource_index: usize,
    updates: RefCell<Vec<RecordedUpdate>>,
    errors: RefCell<Vec<SubscriptionError>>,
    next_timewindow: RefCell<Option<TimewindowFn>>,
    adopted: RefCell<Vec<SubscriptionTimewindow>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new(descriptor: SubscriptionDescriptor, datasource_index: usize) -> Rc<Self> {
        Rc::new(Self {
            descriptor: RefCell::new(descriptor),
            datasource_index,
            updates: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
            next_timewindow: RefCell::new(None),
            adopted: RefCell::new(Vec::new()),
        })
    }

    /// Compute the window returned on reconnect.
    pub fn on_update_realtime<F>(&self, f: F)
    where
        F: Fn() -> SubscriptionTimewindow + 'static,
    {
        *self.next_timewindow.borrow_mut() = Some(Box::new(f));
    }

    #[must_use]
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.borrow().clone()
    }

    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.borrow().len()
    }

    /// Data of the most recent update for `data_key_index`.
    #[must_use]
    pub fn last_data(&self, data_key_index: usize) -> Option<Vec<Sample>> {
        self.updates
            .borrow()
            .iter()
            .rev()
            .find(|u| u.data_key_index == data_key_index)
            .map(|u| u.data.clone())
    }

    #[must_use]
    pub fn last_update(&self) -> Option<RecordedUpdate> {
        self.updates.borrow().last().cloned()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<SubscriptionError> {
        self.errors.borrow().clone()
    }

    /// Windows received through [`DatasourceListener::set_realtime_subscription`].
    #[must_use]
    pub fn adopted_timewindows(&self) -> Vec<SubscriptionTimewindow> {
        self.adopted.borrow().clone()
    }

    pub fn clear(&self) {
        self.updates.borrow_mut().clear();
        self.errors.borrow_mut().clear();
    }
}

impl DatasourceListener for RecordingListener {
    fn descriptor(&self) -> SubscriptionDescriptor {
        self.descriptor.borrow().clone()
    }

    fn datasource_index(&self) -> usize {
        self.datasource_index
    }

    fn data_updated(&self, data: &[Sample], datasource_index: usize, data_key_index: usize, should_apply: bool) {
        self.updates.borrow_mut().push(RecordedUpdate {
            data: data.to_vec(),
            datasource_index,
            data_key_index,
            should_apply,
        });
    }

    fn update_realtime_subscription(&self) -> SubscriptionTimewindow {
        let next = self.next_timewindow.borrow().as_ref().map(|f| f());
        let mut descriptor = self.descriptor.borrow_mut();
        if let Some(tw) = next {
            descriptor.timewindow = Some(tw);
        }
        descriptor.timewindow.clone().unwrap_or_default()
    }

    fn set_realtime_subscription(&self, timewindow: &SubscriptionTimewindow) {
        self.adopted.borrow_mut().push(timewindow.clone());
        self.descriptor.borrow_mut().timewindow = Some(timewindow.clone());
    }

    fn on_error(&self, error: &SubscriptionError) {
        self.errors.borrow_mut().push(error.clone());
    }
}
