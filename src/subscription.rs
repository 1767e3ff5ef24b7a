//! One upstream subscription shared by every listener with the same descriptor.
//!
//! A [`DatasourceSubscription`] keeps one buffer per data key and fans each
//! buffer change out to its listeners. Where the samples come from depends on
//! the descriptor:
//!
//! - entity, fixed window: one `GetHistory` command, delivered once;
//! - entity, realtime window: a persistent timeseries command feeding a
//!   [`DataAggregator`], re-issued with a fresh window after reconnect;
//! - entity, latest values and attributes: persistent commands, first sample per update;
//! - function: a local timer driving the registered generators.
//!
//! For state data the history and realtime flows also send a first-state
//! command that fetches the last value before the window, and merge it into
//! the first primary response.

use crate::aggregator::{AggregatorOptions, DataAggregator, UpdateKind};
use crate::config::{AggregationType, MultiplexerConfig, SubscriptionTimewindow};
use crate::descriptor::{DataKeyType, DatasourceType, SubscriptionDataKey, SubscriptionDescriptor, SubscriptionKind};
use crate::error::{Result, SubscriptionError};
use crate::functions::{FunctionRegistry, PostProcessFn, SeriesFn};
use crate::listener::DatasourceListener;
use crate::metrics::{MetricsCollector, names};
use crate::scheduler::{Scheduler, TimerSlot};
use crate::state_merge::merge_state_history;
use crate::transport::{
    AttributesSubscriptionCmd, CommandId, GetHistoryCmd, SubscriptionHandle, SubscriptionUpdate, TelemetryCommand,
    TelemetrySubscriber, TimeseriesSubscriptionCmd, Transport,
};
use crate::value::DataValue;
use crate::window::{Sample, SeriesBatch, TimestampMs, VisibleWindow, div_floor, sort_by_ts};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Identifies a listener within its registry.
pub type ListenerId = u64;

/// Collaborators shared by every subscription of a registry.
#[derive(Clone)]
pub struct SubscriptionContext {
    pub transport: Rc<dyn Transport>,
    /// Drives aggregator ticks, function generation and the idle close.
    pub scheduler: Rc<dyn Scheduler>,
    pub functions: Rc<FunctionRegistry>,
    pub metrics: MetricsCollector,
    pub config: MultiplexerConfig,
    cmd_ids: Rc<Cell<CommandId>>,
}

impl SubscriptionContext {
    pub fn new(
        transport: Rc<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        functions: Rc<FunctionRegistry>,
        metrics: MetricsCollector,
        config: MultiplexerConfig,
    ) -> Self {
        Self { transport, scheduler, functions, metrics, config, cmd_ids: Rc::new(Cell::new(0)) }
    }

    fn next_cmd_id(&self) -> CommandId {
        let id = self.cmd_ids.get() + 1;
        self.cmd_ids.set(id);
        id
    }
}

/// Buffer of one data key.
struct KeySlot {
    /// Position of the key in the descriptor.
    key_index: usize,
    /// Series name as it appears in incoming batches.
    series: String,
    key_type: DataKeyType,
    generator: Option<SeriesFn>,
    post: Option<PostProcessFn>,
    data: Vec<Sample>,
    orig: Vec<Sample>,
}

impl KeySlot {
    /// Convert and post-process a batch of samples, replacing the buffer.
    fn apply(&mut self, samples: &[Sample], kind: SubscriptionKind, fresh: bool) -> Vec<Sample> {
        let zero = Sample::new(0, 0.0);
        let (mut prev, mut prev_orig) = if fresh {
            (zero.clone(), zero)
        } else {
            (
                self.data.last().cloned().unwrap_or_else(|| zero.clone()),
                self.orig.last().cloned().unwrap_or(zero),
            )
        };
        let source = match kind {
            SubscriptionKind::Timeseries => samples,
            SubscriptionKind::Latest => &samples[..samples.len().min(1)],
        };
        let mut data = Vec::with_capacity(source.len());
        let mut orig = Vec::with_capacity(source.len());
        for s in source {
            let mut value = s.value.converted();
            if let Some(post) = &self.post {
                value = post(s.ts, &value, &prev.value, prev_orig.ts, &prev_orig.value);
            }
            orig.push(s.clone());
            prev_orig = s.clone();
            prev = Sample::new(s.ts, value);
            data.push(prev.clone());
        }
        self.orig = orig;
        self.data.clone_from(&data);
        data
    }
}

/// What an upstream command subscriber feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    History { primary: CommandId, first_state: Option<CommandId> },
    Realtime { primary: CommandId, first_state: Option<CommandId> },
    Latest,
    Attributes,
}

/// Pairs the first-state response with the primary response, in either order.
#[derive(Default)]
struct StatePairing {
    first_state: Option<SeriesBatch>,
    data: Option<SeriesBatch>,
    done: bool,
}

impl StatePairing {
    fn accept(&mut self, is_first_state: bool, batch: SeriesBatch) -> Option<(SeriesBatch, SeriesBatch)> {
        if is_first_state {
            self.first_state = Some(batch);
        } else {
            self.data = Some(batch);
        }
        match (self.first_state.take(), self.data.take()) {
            (Some(first), Some(data)) => {
                self.done = true;
                Some((first, data))
            }
            (first, data) => {
                self.first_state = first;
                self.data = data;
                None
            }
        }
    }
}

struct CommandSubscriber {
    owner: Weak<DatasourceSubscription>,
    role: Role,
    commands: RefCell<Vec<TelemetryCommand>>,
}

impl TelemetrySubscriber for CommandSubscriber {
    fn commands(&self) -> Vec<TelemetryCommand> {
        self.commands.borrow().clone()
    }

    fn on_update(&self, update: SubscriptionUpdate) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_update(self.role, update);
        }
    }

    fn on_reconnected(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_reconnect(self);
        }
    }
}

#[derive(Default)]
struct FunctionTicker {
    timer: TimerSlot,
    scheduled_at: TimestampMs,
    elapsed: i64,
    last_generated: Option<TimestampMs>,
}

/// One shared upstream subscription and the listeners attached to it.
///
/// Owns the per-key buffers, the upstream command subscribers and, for realtime
/// timeseries, the [`DataAggregator`]. Created and torn down by the registry.
pub struct DatasourceSubscription {
    self_ref: Weak<DatasourceSubscription>,
    descriptor: SubscriptionDescriptor,
    ctx: SubscriptionContext,
    history: bool,
    realtime: bool,
    frequency: i64,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn DatasourceListener>)>>,
    slots: RefCell<Vec<KeySlot>>,
    upstream: RefCell<Vec<(Rc<CommandSubscriber>, SubscriptionHandle)>>,
    aggregator: RefCell<Option<Rc<DataAggregator>>>,
    timewindow: RefCell<Option<SubscriptionTimewindow>>,
    pairing: RefCell<StatePairing>,
    snapshot_received: Cell<bool>,
    ticker: RefCell<FunctionTicker>,
    started: Cell<bool>,
    alive: Cell<bool>,
}

impl DatasourceSubscription {
    /// Build the key buffers and resolve named functions. Nothing is sent until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns `UnknownFunction` when a generator or post-processor is not registered.
    pub fn new(descriptor: SubscriptionDescriptor, ctx: SubscriptionContext) -> Result<Rc<Self>> {
        let mut slots = Vec::with_capacity(descriptor.data_keys.len());
        for (key_index, key) in descriptor.data_keys.iter().enumerate() {
            slots.push(Self::build_slot(&descriptor, &ctx.functions, key_index, key)?);
        }
        let timewindow = descriptor.effective_timewindow().cloned();
        let history = timewindow.as_ref().is_some_and(SubscriptionTimewindow::is_history);
        let realtime = timewindow.as_ref().is_some_and(SubscriptionTimewindow::is_realtime);
        let frequency = match (&timewindow, descriptor.kind) {
            (Some(tw), SubscriptionKind::Timeseries) => tw.aggregation.interval.min(ctx.config.max_function_frequency_ms),
            _ => ctx.config.latest_function_frequency_ms,
        };
        Ok(Rc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            history,
            realtime,
            frequency,
            listeners: RefCell::new(Vec::new()),
            slots: RefCell::new(slots),
            upstream: RefCell::new(Vec::new()),
            aggregator: RefCell::new(None),
            timewindow: RefCell::new(timewindow),
            pairing: RefCell::new(StatePairing::default()),
            snapshot_received: Cell::new(false),
            ticker: RefCell::new(FunctionTicker::default()),
            started: Cell::new(false),
            alive: Cell::new(true),
            descriptor,
            ctx,
        }))
    }

    fn build_slot(
        descriptor: &SubscriptionDescriptor,
        functions: &FunctionRegistry,
        key_index: usize,
        key: &SubscriptionDataKey,
    ) -> Result<KeySlot> {
        let generator = match descriptor.datasource_type {
            DatasourceType::Function => {
                let name = key.func_name.clone().unwrap_or_else(|| key.name.clone());
                Some(functions.generator(&name).ok_or(SubscriptionError::UnknownFunction { name })?)
            }
            DatasourceType::Entity => None,
        };
        let post = match &key.post_func_name {
            Some(name) if descriptor.datasource_type == DatasourceType::Entity => Some(
                functions
                    .post_processor(name)
                    .ok_or_else(|| SubscriptionError::UnknownFunction { name: name.clone() })?,
            ),
            _ => None,
        };
        let (series, key_type) = match descriptor.datasource_type {
            DatasourceType::Function => (format!("{}_{}", key.name, key_index), DataKeyType::Function),
            DatasourceType::Entity => (key.name.clone(), key.key_type),
        };
        Ok(KeySlot { key_index, series, key_type, generator, post, data: Vec::new(), orig: Vec::new() })
    }

    #[must_use]
    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn is_history(&self) -> bool {
        self.history
    }

    #[must_use]
    pub fn timewindow(&self) -> Option<SubscriptionTimewindow> {
        self.timewindow.borrow().clone()
    }

    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Current aggregator window, for realtime timeseries subscriptions.
    #[must_use]
    pub fn aggregator_window(&self) -> Option<VisibleWindow> {
        self.aggregator.borrow().as_ref().map(|a| a.window())
    }

    /// Current buffer of the data key at `key_index`.
    #[must_use]
    pub fn key_data(&self, key_index: usize) -> Vec<Sample> {
        self.slots
            .borrow()
            .iter()
            .find(|s| s.key_index == key_index)
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    /// Register a listener. A history subscription starts with its first listener.
    ///
    /// # Errors
    ///
    /// Propagates the start failure of a history subscription.
    pub fn add_listener(&self, id: ListenerId, listener: Rc<dyn DatasourceListener>) -> Result<()> {
        self.listeners.borrow_mut().push((id, listener));
        if self.history { self.start() } else { Ok(()) }
    }

    /// Returns true if the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Replay every key buffer to a late joiner.
    pub fn sync_listener(&self, listener: &dyn DatasourceListener) {
        let buffers: Vec<(usize, Vec<Sample>)> =
            self.slots.borrow().iter().map(|s| (s.key_index, s.data.clone())).collect();
        let ds_index = listener.datasource_index();
        for (key_index, data) in buffers {
            listener.data_updated(&data, ds_index, key_index, false);
            self.ctx.metrics.increment_counter(names::LISTENER_UPDATES, 1);
        }
    }

    /// Send the upstream commands or start the generator timer. Runs at most once.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when the transport rejects a command, or a
    /// `Config` error when the aggregator parameters are invalid.
    pub fn start(&self) -> Result<()> {
        if self.history && !self.has_listeners() {
            return Ok(());
        }
        if self.started.replace(true) || !self.alive.get() {
            return Ok(());
        }
        debug!(
            datasource = ?self.descriptor.datasource_type,
            kind = ?self.descriptor.kind,
            history = self.history,
            "starting datasource subscription"
        );
        match self.descriptor.datasource_type {
            DatasourceType::Entity => self.start_entity(),
            DatasourceType::Function => self.start_function(),
        }
    }

    /// Tear down: cancel commands, timers and the aggregator. Later events are ignored.
    pub fn unsubscribe(&self) {
        if !self.alive.replace(false) {
            return;
        }
        self.ticker.borrow_mut().timer.cancel(&*self.ctx.scheduler);
        let upstream = std::mem::take(&mut *self.upstream.borrow_mut());
        for (_, handle) in upstream {
            self.ctx.transport.unsubscribe(handle);
        }
        if let Some(aggregator) = self.aggregator.borrow_mut().take() {
            aggregator.destroy();
        }
        debug!(keys = self.descriptor.data_keys.len(), "datasource subscription closed");
    }

    fn key_names(&self, key_type: DataKeyType) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for slot in self.slots.borrow().iter().filter(|s| s.key_type == key_type) {
            if !names.contains(&slot.series) {
                names.push(slot.series.clone());
            }
        }
        names
    }

    fn entity_target(&self) -> (String, String) {
        (
            self.descriptor.entity_type.clone().unwrap_or_default(),
            self.descriptor.entity_id.clone().unwrap_or_default(),
        )
    }

    fn first_state_command(&self, cmd_id: CommandId, start_ts: TimestampMs, keys: &str) -> GetHistoryCmd {
        let (entity_type, entity_id) = self.entity_target();
        GetHistoryCmd {
            cmd_id,
            entity_type,
            entity_id,
            keys: keys.to_string(),
            start_ts: start_ts - self.ctx.config.first_state_lookback_ms,
            end_ts: start_ts,
            interval: 1000,
            limit: 1,
            agg: AggregationType::None,
        }
    }

    fn start_entity(&self) -> Result<()> {
        let ts_keys = self.key_names(DataKeyType::Timeseries);
        let attr_keys = self.key_names(DataKeyType::Attribute);
        let (entity_type, entity_id) = self.entity_target();
        let tw = self.timewindow();

        if !ts_keys.is_empty() {
            let keys = ts_keys.join(",");
            let primary = self.ctx.next_cmd_id();
            let (role, commands) = match (&tw, self.history) {
                (Some(tw), true) => {
                    let (start_ts, end_ts) = tw.fixed_window.map_or((tw.start_ts, tw.start_ts), |fw| (fw.start_time_ms, fw.end_time_ms));
                    let mut commands = vec![TelemetryCommand::History(GetHistoryCmd {
                        cmd_id: primary,
                        entity_type: entity_type.clone(),
                        entity_id: entity_id.clone(),
                        keys: keys.clone(),
                        start_ts,
                        end_ts,
                        interval: tw.aggregation.interval,
                        limit: tw.aggregation.limit,
                        agg: tw.aggregation.agg_type,
                    })];
                    let first_state = tw.aggregation.state_data.then(|| {
                        let id = self.ctx.next_cmd_id();
                        commands.push(TelemetryCommand::History(self.first_state_command(id, start_ts, &keys)));
                        id
                    });
                    (Role::History { primary, first_state }, commands)
                }
                (Some(tw), false) => {
                    let mut cmd = TimeseriesSubscriptionCmd {
                        cmd_id: primary,
                        entity_type: entity_type.clone(),
                        entity_id: entity_id.clone(),
                        keys: keys.clone(),
                        start_ts: None,
                        time_window: None,
                        interval: None,
                        limit: None,
                        agg: None,
                        unsubscribe: false,
                    };
                    apply_window(&mut cmd, tw);
                    let mut commands = vec![TelemetryCommand::Timeseries(cmd)];
                    let first_state = tw.aggregation.state_data.then(|| {
                        let id = self.ctx.next_cmd_id();
                        commands.push(TelemetryCommand::History(self.first_state_command(id, tw.start_ts, &keys)));
                        id
                    });
                    let options = AggregatorOptions::from_timewindow(ts_keys.clone(), tw);
                    self.install_aggregator(options, DataKeyType::Timeseries)?;
                    (Role::Realtime { primary, first_state }, commands)
                }
                (None, _) => {
                    let cmd = TimeseriesSubscriptionCmd {
                        cmd_id: primary,
                        entity_type: entity_type.clone(),
                        entity_id: entity_id.clone(),
                        keys,
                        start_ts: None,
                        time_window: None,
                        interval: None,
                        limit: None,
                        agg: None,
                        unsubscribe: false,
                    };
                    (Role::Latest, vec![TelemetryCommand::Timeseries(cmd)])
                }
            };
            self.subscribe_upstream(role, commands)?;
        }

        if !attr_keys.is_empty() {
            let cmd = AttributesSubscriptionCmd {
                cmd_id: self.ctx.next_cmd_id(),
                entity_type,
                entity_id,
                keys: attr_keys.join(","),
                unsubscribe: false,
            };
            self.subscribe_upstream(Role::Attributes, vec![TelemetryCommand::Attributes(cmd)])?;
        }
        Ok(())
    }

    fn subscribe_upstream(&self, role: Role, commands: Vec<TelemetryCommand>) -> Result<()> {
        let subscriber = Rc::new(CommandSubscriber {
            owner: self.self_ref.clone(),
            role,
            commands: RefCell::new(commands),
        });
        let handle = self.ctx.transport.subscribe(Rc::clone(&subscriber) as Rc<dyn TelemetrySubscriber>)?;
        trace!(?role, handle = handle.0, "upstream commands sent");
        self.upstream.borrow_mut().push((subscriber, handle));
        Ok(())
    }

    fn install_aggregator(&self, options: AggregatorOptions, key_type: DataKeyType) -> Result<()> {
        let weak = self.self_ref.clone();
        let aggregator = DataAggregator::new(
            options,
            Rc::new(move |data: &SeriesBatch, should_apply: bool| {
                if let Some(sub) = weak.upgrade() {
                    sub.deliver(data, key_type, should_apply);
                }
            }),
            Rc::clone(&self.ctx.scheduler),
        )?
        .with_metrics(self.ctx.metrics.clone());
        *self.aggregator.borrow_mut() = Some(Rc::new(aggregator));
        Ok(())
    }

    fn current_aggregator(&self) -> Option<Rc<DataAggregator>> {
        self.aggregator.borrow().clone()
    }

    fn handle_update(&self, role: Role, update: SubscriptionUpdate) {
        if !self.alive.get() {
            return;
        }
        if update.is_error() {
            let error = SubscriptionError::Upstream {
                code: update.error_code,
                message: update.error_msg.unwrap_or_default(),
            };
            warn!(cmd_id = update.subscription_id, %error, "upstream subscription error");
            self.notify_error(&error);
            return;
        }
        match role {
            Role::History { first_state, .. } => {
                let is_first_state = first_state == Some(update.subscription_id);
                let paired = first_state.is_some() && !self.pairing.borrow().done;
                if paired {
                    let merged = self.pairing.borrow_mut().accept(is_first_state, update.data);
                    if let Some((first, data)) = merged {
                        let Some(window) = self.history_window() else {
                            return;
                        };
                        let out = merge_state_history(&first, data, self.limit(), window);
                        self.deliver(&out, DataKeyType::Timeseries, true);
                    }
                } else if !is_first_state {
                    let mut data = update.data;
                    for samples in data.values_mut() {
                        sort_by_ts(samples);
                    }
                    self.deliver(&data, DataKeyType::Timeseries, true);
                }
            }
            Role::Realtime { first_state, .. } => {
                let is_first_state = first_state == Some(update.subscription_id);
                if first_state.is_some() && !self.pairing.borrow().done {
                    let merged = self.pairing.borrow_mut().accept(is_first_state, update.data);
                    if let Some((first, data)) = merged {
                        let Some(window) = self.timewindow().map(|tw| tw.visible_window()) else {
                            return;
                        };
                        let out = merge_state_history(&first, data, self.limit(), window);
                        self.feed_aggregator(&out);
                    }
                } else if is_first_state {
                    trace!(cmd_id = update.subscription_id, "late first-state response ignored");
                } else {
                    self.feed_aggregator(&update.data);
                }
            }
            Role::Latest => self.deliver(&update.data, DataKeyType::Timeseries, true),
            Role::Attributes => self.deliver(&update.data, DataKeyType::Attribute, true),
        }
    }

    /// The first server response after (re)subscribing is a reduced snapshot; later ones are raw appends.
    fn feed_aggregator(&self, data: &SeriesBatch) {
        let kind = if self.snapshot_received.replace(true) { UpdateKind::Append } else { UpdateKind::Snapshot };
        if let Some(aggregator) = self.current_aggregator() {
            aggregator.on_data(data, kind, false, true);
        }
    }

    fn history_window(&self) -> Option<VisibleWindow> {
        let tw = self.timewindow.borrow();
        let fw = tw.as_ref()?.fixed_window?;
        Some(VisibleWindow { start: fw.start_time_ms, end: fw.end_time_ms })
    }

    fn limit(&self) -> usize {
        self.timewindow.borrow().as_ref().map_or(usize::MAX, |tw| tw.aggregation.limit)
    }

    fn handle_reconnect(&self, subscriber: &CommandSubscriber) {
        let Role::Realtime { primary, first_state } = subscriber.role else {
            return;
        };
        if !self.alive.get() {
            return;
        }
        let listeners = self.listener_snapshot();
        let mut canonical: Option<SubscriptionTimewindow> = None;
        for listener in &listeners {
            match &canonical {
                None => canonical = Some(listener.update_realtime_subscription()),
                Some(tw) => listener.set_realtime_subscription(tw),
            }
        }
        let Some(tw) = canonical.or_else(|| self.timewindow()) else {
            return;
        };
        if let Err(e) = tw.validate() {
            warn!(error = %e, "listener produced an invalid realtime window");
            self.notify_error(&e.into());
            return;
        }
        debug!(start_ts = tw.start_ts, time_window = tw.aggregation.time_window, "realtime subscription reconnected");
        *self.timewindow.borrow_mut() = Some(tw.clone());
        *self.pairing.borrow_mut() = StatePairing::default();
        self.snapshot_received.set(false);
        for cmd in subscriber.commands.borrow_mut().iter_mut() {
            match cmd {
                TelemetryCommand::Timeseries(c) if c.cmd_id == primary => apply_window(c, &tw),
                TelemetryCommand::History(c) if Some(c.cmd_id) == first_state => {
                    c.start_ts = tw.start_ts - self.ctx.config.first_state_lookback_ms;
                    c.end_ts = tw.start_ts;
                }
                _ => {}
            }
        }
        if let Some(aggregator) = self.current_aggregator()
            && let Err(e) = aggregator.reset(tw.start_ts, tw.aggregation.time_window, tw.aggregation.interval)
        {
            self.notify_error(&e.into());
        }
    }

    fn start_function(&self) -> Result<()> {
        if self.descriptor.kind == SubscriptionKind::Timeseries
            && let Some(tw) = self.timewindow()
        {
            let series = self.slots.borrow().iter().map(|s| s.series.clone()).collect();
            self.install_aggregator(AggregatorOptions::from_timewindow(series, &tw), DataKeyType::Function)?;
        }
        self.ticker.borrow_mut().scheduled_at = self.ctx.scheduler.now();
        if self.history {
            self.on_function_tick(true);
        } else {
            self.schedule_function_tick(0);
        }
        Ok(())
    }

    fn schedule_function_tick(&self, delay_ms: i64) {
        let weak = self.self_ref.clone();
        let scheduler = Rc::clone(&self.ctx.scheduler);
        self.ticker.borrow_mut().timer.set(&*scheduler, delay_ms, move |generation| {
            Box::new(move || {
                let Some(sub) = weak.upgrade() else {
                    return;
                };
                let fired = sub.ticker.borrow_mut().timer.take_fired(generation);
                if fired {
                    sub.on_function_tick(true);
                }
            })
        });
    }

    fn on_function_tick(&self, should_apply: bool) {
        if !self.alive.get() {
            return;
        }
        let now = self.ctx.scheduler.now();
        {
            let mut ticker = self.ticker.borrow_mut();
            ticker.elapsed += now - ticker.scheduled_at;
            ticker.scheduled_at = now;
            ticker.timer.cancel(&*self.ctx.scheduler);
        }
        match self.descriptor.kind {
            SubscriptionKind::Timeseries => self.generate_series(should_apply),
            SubscriptionKind::Latest => self.generate_latest(now, should_apply),
        }
        if !self.history && self.alive.get() {
            self.schedule_function_tick(self.frequency);
        }
    }

    fn generate_series(&self, should_apply: bool) {
        let Some(tw) = self.timewindow() else {
            return;
        };
        let freq = self.frequency;
        let (start, end) = {
            let mut ticker = self.ticker.borrow_mut();
            let consumed = if self.history { freq } else { div_floor(ticker.elapsed, freq).max(0) * freq };
            ticker.elapsed -= consumed;
            match (self.history, ticker.last_generated) {
                (true, _) => tw.fixed_window.map_or((tw.start_ts, tw.start_ts), |fw| (fw.start_time_ms, fw.end_time_ms)),
                (false, Some(last)) => (last + freq, last + consumed),
                (false, None) => {
                    let start = tw.start_ts;
                    let end = start + tw.realtime_window_ms.unwrap_or(tw.aggregation.time_window) + freq;
                    if tw.aggregation.agg_type == AggregationType::None {
                        let points = i64::try_from(tw.aggregation.limit).unwrap_or(i64::MAX);
                        (start.max(end.saturating_sub(freq.saturating_mul(points))), end)
                    } else {
                        (start, end)
                    }
                }
            }
        };
        let mut batch = SeriesBatch::new();
        let mut last_ts = None;
        for slot in self.slots.borrow().iter() {
            let Some(func) = &slot.generator else {
                continue;
            };
            let mut prev = slot.data.last().map_or_else(DataValue::default, |s| s.value.clone());
            let mut samples = Vec::new();
            let mut time = start;
            while time <= end {
                let value = func(time, &prev);
                samples.push(Sample::new(time, value.clone()));
                prev = value;
                time += freq;
            }
            if let Some(last) = samples.last() {
                last_ts = Some(last.ts);
            }
            batch.insert(slot.series.clone(), samples);
        }
        if last_ts.is_some() {
            self.ticker.borrow_mut().last_generated = last_ts;
        }
        trace!(start, end, "generated function series");
        if let Some(aggregator) = self.current_aggregator() {
            aggregator.on_data(&batch, UpdateKind::Append, self.history, should_apply);
        }
    }

    fn generate_latest(&self, now: TimestampMs, should_apply: bool) {
        let updates: Vec<(usize, Vec<Sample>)> = {
            let mut slots = self.slots.borrow_mut();
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let func = slot.generator.clone()?;
                    let prev = slot.data.last().map_or_else(DataValue::default, |s| s.value.clone());
                    slot.data = vec![Sample::new(now, func(now, &prev))];
                    Some((slot.key_index, slot.data.clone()))
                })
                .collect()
        };
        self.notify(&updates, should_apply);
    }

    /// Route a batch to the key buffers it names and notify listeners.
    fn deliver(&self, batch: &SeriesBatch, key_type: DataKeyType, should_apply: bool) {
        if !self.alive.get() {
            return;
        }
        let kind = self.descriptor.kind;
        let fresh = self.realtime;
        let updates: Vec<(usize, Vec<Sample>)> = {
            let mut slots = self.slots.borrow_mut();
            let mut updates = Vec::new();
            for (series, samples) in batch {
                let mut matched = false;
                for slot in slots.iter_mut().filter(|s| s.key_type == key_type && s.series == *series) {
                    matched = true;
                    updates.push((slot.key_index, slot.apply(samples, kind, fresh)));
                }
                if !matched {
                    trace!(series = %series, "update for unknown series ignored");
                }
            }
            updates
        };
        self.notify(&updates, should_apply);
    }

    fn notify(&self, updates: &[(usize, Vec<Sample>)], should_apply: bool) {
        let listeners = self.listener_snapshot();
        for (key_index, data) in updates {
            for listener in &listeners {
                listener.data_updated(data, listener.datasource_index(), *key_index, should_apply);
                self.ctx.metrics.increment_counter(names::LISTENER_UPDATES, 1);
            }
        }
    }

    fn notify_error(&self, error: &SubscriptionError) {
        for listener in self.listener_snapshot() {
            listener.on_error(error);
        }
    }

    fn listener_snapshot(&self) -> Vec<Rc<dyn DatasourceListener>> {
        self.listeners.borrow().iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

fn apply_window(cmd: &mut TimeseriesSubscriptionCmd, tw: &SubscriptionTimewindow) {
    cmd.start_ts = Some(tw.start_ts);
    cmd.time_window = Some(tw.aggregation.time_window);
    cmd.interval = Some(tw.aggregation.interval);
    cmd.limit = Some(tw.aggregation.limit);
    cmd.agg = Some(tw.aggregation.agg_type);
}

impl Drop for DatasourceSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
