//! Listener-facing registry of shared upstream subscriptions.
//!
//! [`SubscriptionRegistry`] hashes each listener's descriptor and attaches the
//! listener to the one [`DatasourceSubscription`] for that key, creating and
//! starting it on first use. A late joiner is replayed the current buffers
//! synchronously. The last listener to leave tears the subscription down.
//!
//! When the registry becomes empty it arms an idle timer; if nothing was
//! subscribed by the time it fires and the transport has no commands in
//! flight, the transport connection is closed.

use crate::config::MultiplexerConfig;
use crate::descriptor::DescriptorKey;
use crate::error::{ConfigError, Result};
use crate::functions::FunctionRegistry;
use crate::listener::DatasourceListener;
use crate::metrics::{MetricsCollector, names};
use crate::scheduler::{Scheduler, TimerSlot};
use crate::subscription::{DatasourceSubscription, ListenerId, SubscriptionContext};
use crate::transport::Transport;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Returned by [`SubscriptionRegistry::subscribe`]; pass it back to unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    key: DescriptorKey,
    id: ListenerId,
}

impl ListenerHandle {
    #[must_use]
    pub fn key(&self) -> &DescriptorKey {
        &self.key
    }
}

/// Shares one upstream subscription between all listeners with equal descriptors.
///
/// Single-threaded: every callback runs on the caller's thread or from the
/// [`Scheduler`], never concurrently.
pub struct SubscriptionRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

struct RegistryInner {
    self_ref: Weak<RefCell<RegistryInner>>,
    ctx: SubscriptionContext,
    subscriptions: HashMap<DescriptorKey, Rc<DatasourceSubscription>>,
    next_listener_id: ListenerId,
    idle_timer: TimerSlot,
}

impl SubscriptionRegistry {
    /// Create a registry with its own metrics collector.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when `config` fails [`MultiplexerConfig::validate`].
    pub fn new(
        transport: Rc<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        functions: FunctionRegistry,
        config: MultiplexerConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_metrics(transport, scheduler, functions, config, MetricsCollector::new())
    }

    /// Create a registry that reports into a shared `metrics` collector.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when `config` fails [`MultiplexerConfig::validate`].
    pub fn with_metrics(
        transport: Rc<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        functions: FunctionRegistry,
        config: MultiplexerConfig,
        metrics: MetricsCollector,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ctx = SubscriptionContext::new(transport, scheduler, Rc::new(functions), metrics, config);
        let inner = Rc::new_cyclic(|weak| {
            RefCell::new(RegistryInner {
                self_ref: weak.clone(),
                ctx,
                subscriptions: HashMap::new(),
                next_listener_id: 0,
                idle_timer: TimerSlot::new(),
            })
        });
        Ok(Self { inner })
    }

    /// Attach `listener` to the shared subscription for its descriptor.
    ///
    /// # Errors
    ///
    /// - `UnresolvedEntity`, `MissingTimewindow` or `Config` when the descriptor is unusable
    /// - `UnknownFunction` when a named function is not registered
    /// - `Transport` when the upstream commands are rejected; nothing stays registered
    pub fn subscribe(&self, listener: Rc<dyn DatasourceListener>) -> Result<ListenerHandle> {
        let descriptor = listener.descriptor();
        descriptor.validate()?;
        let key = descriptor.key()?;
        let (id, existing, ctx) = {
            let mut inner = self.inner.borrow_mut();
            let scheduler = Rc::clone(&inner.ctx.scheduler);
            inner.idle_timer.cancel(&*scheduler);
            inner.next_listener_id += 1;
            (inner.next_listener_id, inner.subscriptions.get(&key).cloned(), inner.ctx.clone())
        };
        let subscription = match existing {
            Some(sub) => {
                trace!(key = %key, "joining existing subscription");
                sub.sync_listener(&*listener);
                sub
            }
            None => {
                let sub = match DatasourceSubscription::new(descriptor, ctx.clone()) {
                    Ok(sub) => sub,
                    Err(e) => {
                        if self.subscription_count() == 0 {
                            RegistryInner::arm_idle_timer(&self.inner);
                        }
                        return Err(e);
                    }
                };
                self.inner.borrow_mut().subscriptions.insert(key.clone(), Rc::clone(&sub));
                ctx.metrics.increment_counter(names::UPSTREAM_SUBSCRIPTIONS_CREATED, 1);
                self.update_gauge();
                debug!(key = %key, "upstream subscription created");
                if let Err(e) = sub.start() {
                    self.remove_subscription(&key);
                    return Err(e);
                }
                sub
            }
        };
        if let Err(e) = subscription.add_listener(id, listener) {
            subscription.remove_listener(id);
            if !subscription.has_listeners() {
                self.remove_subscription(&key);
            }
            return Err(e);
        }
        Ok(ListenerHandle { key, id })
    }

    /// Detach a listener. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: &ListenerHandle) {
        let Some(subscription) = self.inner.borrow().subscriptions.get(&handle.key).cloned() else {
            return;
        };
        if !subscription.remove_listener(handle.id) {
            return;
        }
        trace!(key = %handle.key, "listener detached");
        if !subscription.has_listeners() {
            self.remove_subscription(&handle.key);
        }
    }

    /// Tear down every subscription.
    pub fn unsubscribe_all(&self) {
        let keys: Vec<DescriptorKey> = self.inner.borrow().subscriptions.keys().cloned().collect();
        for key in keys {
            self.remove_subscription(&key);
        }
    }

    /// Number of live upstream subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().subscriptions.len()
    }

    #[must_use]
    pub fn subscription(&self, key: &DescriptorKey) -> Option<Rc<DatasourceSubscription>> {
        self.inner.borrow().subscriptions.get(key).cloned()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsCollector {
        self.inner.borrow().ctx.metrics.clone()
    }

    /// Whether the transport is scheduled to close for lack of subscriptions.
    #[must_use]
    pub fn is_idle_close_pending(&self) -> bool {
        self.inner.borrow().idle_timer.is_pending()
    }

    fn remove_subscription(&self, key: &DescriptorKey) {
        let (removed, empty) = {
            let mut inner = self.inner.borrow_mut();
            let removed = inner.subscriptions.remove(key);
            (removed, inner.subscriptions.is_empty())
        };
        let Some(subscription) = removed else {
            return;
        };
        subscription.unsubscribe();
        let metrics = self.metrics();
        metrics.increment_counter(names::UPSTREAM_SUBSCRIPTIONS_CLOSED, 1);
        self.update_gauge();
        debug!(key = %key, "upstream subscription torn down");
        if empty {
            RegistryInner::arm_idle_timer(&self.inner);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        let inner = self.inner.borrow();
        inner.ctx.metrics.set_gauge(names::ACTIVE_SUBSCRIPTIONS, inner.subscriptions.len() as f64);
    }
}

impl RegistryInner {
    fn arm_idle_timer(this: &Rc<RefCell<RegistryInner>>) {
        let mut inner = this.borrow_mut();
        let weak = inner.self_ref.clone();
        let scheduler = Rc::clone(&inner.ctx.scheduler);
        let timeout = inner.ctx.config.idle_timeout_ms;
        inner.idle_timer.set(&*scheduler, timeout, move |generation| {
            Box::new(move || RegistryInner::on_idle_timeout(&weak, generation))
        });
        trace!(timeout, "idle close armed");
    }

    fn on_idle_timeout(weak: &Weak<RefCell<RegistryInner>>, generation: u64) {
        let Some(this) = weak.upgrade() else {
            return;
        };
        let transport = {
            let mut inner = this.borrow_mut();
            if !inner.idle_timer.take_fired(generation) || !inner.subscriptions.is_empty() {
                return;
            }
            Rc::clone(&inner.ctx.transport)
        };
        if transport.has_pending_commands() {
            trace!("idle close skipped, commands in flight");
            return;
        }
        transport.close();
        this.borrow().ctx.metrics.increment_counter(names::TRANSPORT_IDLE_CLOSES, 1);
        debug!("transport closed after idle timeout");
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.unsubscribe_all();
        let mut inner = self.inner.borrow_mut();
        let scheduler = Rc::clone(&inner.ctx.scheduler);
        inner.idle_timer.cancel(&*scheduler);
    }
}
