//! Consumer side of a subscription.

use crate::config::SubscriptionTimewindow;
use crate::descriptor::SubscriptionDescriptor;
use crate::error::SubscriptionError;
use crate::window::Sample;

/// A renderer or other consumer attached to a datasource.
///
/// Methods take `&self`; implementors keep their own state behind interior
/// mutability. Delivered slices are snapshots valid for the duration of the
/// call only.
pub trait DatasourceListener {
    /// The subscription this listener wants. Equal descriptors share one upstream subscription.
    fn descriptor(&self) -> SubscriptionDescriptor;

    fn datasource_index(&self) -> usize;

    /// The visible window of the data key at `data_key_index` changed.
    ///
    /// `should_apply` asks the consumer to render synchronously rather than batch.
    fn data_updated(&self, data: &[Sample], datasource_index: usize, data_key_index: usize, should_apply: bool);

    /// Recompute the realtime window after a reconnect and return it.
    ///
    /// Only the first listener of a shared subscription is asked; the others
    /// receive its result through [`Self::set_realtime_subscription`].
    fn update_realtime_subscription(&self) -> SubscriptionTimewindow;

    fn set_realtime_subscription(&self, timewindow: &SubscriptionTimewindow);

    /// The upstream subscription failed or reported an error.
    fn on_error(&self, _error: &SubscriptionError) {}
}
