//! Windowed aggregation of streamed samples.
//!
//! A [`DataAggregator`] buckets the samples of a fixed set of series into
//! aligned intervals, reduces every bucket with the configured
//! [`AggregationType`], and emits the buckets that fall inside its visible
//! window `(start, end]`.
//!
//! In realtime mode the window slides forward by whole intervals on a
//! periodic tick (`max(interval, 1000)` ms) and the current window is
//! re-delivered on every tick. In historical mode nothing ticks; every batch
//! is delivered immediately.
//!
//! ## Update kinds
//!
//! - [`UpdateKind::Snapshot`] -- the batch is a complete, server-reduced view.
//!   The bucket map is rebuilt from it wholesale, each sample becoming the
//!   bucket at its own timestamp. Delivering the same snapshot twice yields
//!   the same window.
//! - [`UpdateKind::Append`] -- raw samples folded into aligned buckets. The
//!   first append (and the first one after [`DataAggregator::reset`]) starts
//!   from an empty map.
//!
//! Whenever the map is rebuilt the visible window is recomputed and
//! delivered at once.
//!
//! ## Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use telemetry_window::aggregator::{AggregatorOptions, DataAggregator, UpdateKind};
//! use telemetry_window::config::AggregationType;
//! use telemetry_window::scheduler::ManualScheduler;
//! use telemetry_window::window::{Sample, SeriesBatch};
//!
//! # fn main() -> Result<(), telemetry_window::error::ConfigError> {
//! let scheduler = Rc::new(ManualScheduler::new(0));
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let agg = DataAggregator::new(
//!     AggregatorOptions {
//!         keys: vec!["temperature".into()],
//!         start_ts: 0,
//!         limit: 100,
//!         agg_type: AggregationType::Avg,
//!         time_window: 10_000,
//!         interval: 1000,
//!         state_data: false,
//!     },
//!     Rc::new(move |data: &SeriesBatch, _apply: bool| sink.borrow_mut().push(data.clone())),
//!     scheduler.clone(),
//! )?;
//!
//! let mut batch = SeriesBatch::new();
//! batch.insert("temperature".into(), vec![Sample::new(100, 20.0), Sample::new(900, 22.0)]);
//! agg.on_data(&batch, UpdateKind::Append, false, true);
//!
//! assert_eq!(seen.borrow()[0]["temperature"], vec![Sample::new(500, 21.0)]);
//! # Ok(())
//! # }
//! ```

use crate::config::{AggregationType, MIN_AGGREGATION_TICK_MS, SubscriptionTimewindow};
use crate::error::ConfigError;
use crate::metrics::{MetricsCollector, names};
use crate::reducer::{AggregationMap, prepare};
use crate::scheduler::{Scheduler, TimerSlot};
use crate::state_merge::merge_state_bounds;
use crate::value::DataValue;
use crate::window::{Sample, SeriesBatch, TimestampMs, VisibleWindow, bucket_ts, div_floor};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Receives the visible window of every series and the `should_apply` flag.
pub type DataCallback = Rc<dyn Fn(&SeriesBatch, bool)>;

/// Construction parameters of a [`DataAggregator`].
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatorOptions {
    /// Series the aggregator emits; samples of other series are ignored.
    pub keys: Vec<String>,
    /// Exclusive lower bound of the first visible window; buckets align to it.
    pub start_ts: TimestampMs,
    /// Maximum rows per series; the oldest are dropped first.
    pub limit: usize,
    /// Reducer applied to each bucket.
    pub agg_type: AggregationType,
    /// Width of the visible window in milliseconds.
    pub time_window: i64,
    /// Bucket width, also the step the window slides by.
    pub interval: i64,
    /// Add boundary points so step-shaped series start at the window start and extend to its end.
    pub state_data: bool,
}

impl AggregatorOptions {
    #[must_use]
    pub fn from_timewindow(keys: Vec<String>, tw: &SubscriptionTimewindow) -> Self {
        Self {
            keys,
            start_ts: tw.start_ts,
            limit: tw.aggregation.limit,
            agg_type: tw.aggregation.agg_type,
            time_window: tw.aggregation.time_window,
            interval: tw.aggregation.interval,
            state_data: tw.aggregation.state_data,
        }
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` for a non-positive interval, a zero limit or a negative window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval <= 0 {
            return Err(ConfigError::InvalidInterval { interval: self.interval });
        }
        if self.limit == 0 {
            return Err(ConfigError::InvalidLimit { limit: self.limit });
        }
        if self.time_window < 0 {
            return Err(ConfigError::InvalidTimeWindow { window: self.time_window });
        }
        Ok(())
    }
}

/// How an incoming batch relates to the aggregator's current buckets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Server-reduced view of the whole window; replaces every bucket.
    Snapshot,
    /// Raw samples folded into existing buckets.
    Append,
}

/// Windowed aggregator. Owns its bucket map and its single tick timer.
///
/// Dropping the aggregator (or calling [`DataAggregator::destroy`]) cancels
/// the pending tick; no callback runs afterwards.
pub struct DataAggregator {
    state: Rc<RefCell<AggState>>,
}

struct AggState {
    self_ref: Weak<RefCell<AggState>>,
    on_data: DataCallback,
    scheduler: Rc<dyn Scheduler>,
    metrics: Option<MetricsCollector>,
    keys: Vec<String>,
    window: VisibleWindow,
    limit: usize,
    agg_type: AggregationType,
    interval: i64,
    aggregation_timeout: i64,
    state_data: bool,
    map: AggregationMap,
    data_received: bool,
    reset_pending: bool,
    output: Option<SeriesBatch>,
    last_prev: HashMap<String, Sample>,
    elapsed: i64,
    scheduled_at: TimestampMs,
    timer: TimerSlot,
    alive: bool,
}

type Delivery = (DataCallback, SeriesBatch, bool);

impl DataAggregator {
    /// # Errors
    ///
    /// Returns a `ConfigError` when the options fail [`AggregatorOptions::validate`].
    pub fn new(
        options: AggregatorOptions,
        on_data: DataCallback,
        scheduler: Rc<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let now = scheduler.now();
        let mut map = AggregationMap::new();
        for key in &options.keys {
            map.ensure_series(key);
        }
        let state = Rc::new_cyclic(|weak| {
            RefCell::new(AggState {
                self_ref: weak.clone(),
                on_data,
                scheduler,
                metrics: None,
                window: VisibleWindow::new(options.start_ts, options.time_window),
                limit: options.limit,
                agg_type: options.agg_type,
                interval: options.interval,
                aggregation_timeout: options.interval.max(MIN_AGGREGATION_TICK_MS),
                state_data: options.state_data,
                keys: options.keys,
                map,
                data_received: false,
                reset_pending: false,
                output: None,
                last_prev: HashMap::new(),
                elapsed: 0,
                scheduled_at: now,
                timer: TimerSlot::new(),
                alive: true,
            })
        });
        Ok(Self { state })
    }

    /// Report NaN coercions and deliveries to `metrics`.
    #[must_use]
    pub fn with_metrics(self, metrics: MetricsCollector) -> Self {
        self.state.borrow_mut().metrics = Some(metrics);
        self
    }

    /// Replace the delivery callback, returning the previous one.
    pub fn update_on_data_cb(&self, on_data: DataCallback) -> DataCallback {
        std::mem::replace(&mut self.state.borrow_mut().on_data, on_data)
    }

    /// Move to a new window. The next batch rebuilds the bucket map from scratch.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a non-positive interval or a negative window.
    pub fn reset(&self, start_ts: TimestampMs, time_window: i64, interval: i64) -> Result<(), ConfigError> {
        if interval <= 0 {
            return Err(ConfigError::InvalidInterval { interval });
        }
        if time_window < 0 {
            return Err(ConfigError::InvalidTimeWindow { window: time_window });
        }
        let mut st = self.state.borrow_mut();
        if !st.alive {
            return Ok(());
        }
        let scheduler = Rc::clone(&st.scheduler);
        st.timer.cancel(&*scheduler);
        st.scheduled_at = scheduler.now();
        st.window = VisibleWindow::new(start_ts, time_window);
        st.interval = interval;
        st.elapsed = 0;
        st.aggregation_timeout = interval.max(MIN_AGGREGATION_TICK_MS);
        st.reset_pending = true;
        debug!(start_ts, time_window, interval, "aggregator reset");
        st.schedule_tick();
        Ok(())
    }

    /// Feed a batch of samples.
    ///
    /// `historical` aggregators never tick, so every historical batch is
    /// delivered right away. `should_apply` is passed through to the callback.
    pub fn on_data(&self, batch: &SeriesBatch, kind: UpdateKind, historical: bool, should_apply: bool) {
        let delivery = {
            let mut st = self.state.borrow_mut();
            if !st.alive {
                return;
            }
            if !st.data_received || st.reset_pending || kind == UpdateKind::Snapshot {
                if !st.data_received {
                    st.data_received = true;
                    st.elapsed = 0;
                    if !st.reset_pending {
                        st.scheduled_at = st.scheduler.now();
                    }
                }
                st.reset_pending = false;
                st.map = AggregationMap::new();
                match kind {
                    UpdateKind::Snapshot => st.process_snapshot(batch),
                    UpdateKind::Append => st.fold_batch(batch),
                }
                st.output = None;
                Some(st.on_interval(historical, should_apply))
            } else {
                st.fold_batch(batch);
                if historical {
                    st.scheduled_at = st.scheduler.now();
                    Some(st.on_interval(historical, should_apply))
                } else {
                    None
                }
            }
        };
        if let Some((cb, data, apply)) = delivery {
            cb(&data, apply);
        }
    }

    /// Cancel the pending tick and drop all buckets. Later calls are no-ops.
    pub fn destroy(&self) {
        let mut st = self.state.borrow_mut();
        if !st.alive {
            return;
        }
        st.alive = false;
        let scheduler = Rc::clone(&st.scheduler);
        st.timer.cancel(&*scheduler);
        st.map.clear();
        st.output = None;
        st.last_prev.clear();
        trace!("aggregator destroyed");
    }

    /// The current `(start, end]` window.
    #[must_use]
    pub fn window(&self) -> VisibleWindow {
        self.state.borrow().window
    }

    #[must_use]
    pub fn interval(&self) -> i64 {
        self.state.borrow().interval
    }

    /// The last window delivered, if any.
    #[must_use]
    pub fn current_output(&self) -> Option<SeriesBatch> {
        self.state.borrow().output.clone()
    }

    #[must_use]
    pub fn is_reset_pending(&self) -> bool {
        self.state.borrow().reset_pending
    }

    /// Whether a periodic tick is armed.
    #[must_use]
    pub fn has_pending_tick(&self) -> bool {
        self.state.borrow().timer.is_pending()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.state.borrow().map.bucket_count()
    }

    fn on_tick(weak: &Weak<RefCell<AggState>>, generation: u64) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let delivery = {
            let mut st = state.borrow_mut();
            if !st.alive || !st.timer.take_fired(generation) {
                trace!("stale aggregator tick ignored");
                return;
            }
            st.on_interval(false, false)
        };
        let (cb, data, apply) = delivery;
        cb(&data, apply);
    }
}

impl Drop for DataAggregator {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl AggState {
    fn schedule_tick(&mut self) {
        let weak = self.self_ref.clone();
        let scheduler = Rc::clone(&self.scheduler);
        let timeout = self.aggregation_timeout;
        self.timer.set(&*scheduler, timeout, move |generation| {
            Box::new(move || DataAggregator::on_tick(&weak, generation))
        });
    }

    /// Advance elapsed time, slide the window, rebuild output when needed and reschedule.
    fn on_interval(&mut self, historical: bool, should_apply: bool) -> Delivery {
        let scheduler = Rc::clone(&self.scheduler);
        let now = scheduler.now();
        self.elapsed += now - self.scheduled_at;
        self.scheduled_at = now;
        self.timer.cancel(&*scheduler);
        if historical {
            self.output = Some(self.update_data());
        } else {
            let delta = div_floor(self.elapsed, self.interval).max(0);
            if delta > 0 || self.output.is_none() {
                self.window.slide(delta, self.interval);
                self.output = Some(self.update_data());
                self.elapsed -= delta * self.interval;
            }
        }
        if let Some(m) = &self.metrics {
            m.increment_counter(names::AGGREGATOR_DELIVERIES, 1);
        }
        let data = self.output.clone().unwrap_or_default();
        if !historical {
            self.schedule_tick();
        }
        (Rc::clone(&self.on_data), data, should_apply)
    }

    fn coerce(&self, raw: &DataValue) -> DataValue {
        let v = prepare(self.agg_type, raw);
        if self.agg_type.is_enabled() && v.to_number().is_nan() && raw.as_f64().is_none_or(|n| !n.is_nan()) {
            trace!(value = %raw, "non-numeric value coerced to NaN");
            if let Some(m) = &self.metrics {
                m.increment_counter(names::NAN_COERCIONS, 1);
            }
        }
        v
    }

    fn fold_batch(&mut self, batch: &SeriesBatch) {
        let (start, interval, mode) = (self.window.start, self.interval, self.agg_type);
        for key in self.keys.clone() {
            let Some(samples) = batch.get(&key) else {
                continue;
            };
            for s in samples {
                let bucket = if mode.is_enabled() { bucket_ts(s.ts, start, interval) } else { s.ts };
                let v = self.coerce(&s.value);
                self.map.fold_value(&key, bucket, mode, v);
            }
        }
    }

    fn process_snapshot(&mut self, batch: &SeriesBatch) {
        let mode = self.agg_type;
        for key in self.keys.clone() {
            self.map.ensure_series(&key);
            let Some(samples) = batch.get(&key) else {
                continue;
            };
            for s in samples {
                let v = self.coerce(&s.value);
                self.map.insert_aggregate(&key, s.ts, mode, v);
            }
        }
    }

    /// Build the visible window of every series from the bucket map.
    fn update_data(&mut self) -> SeriesBatch {
        let window = self.window;
        let mut out = SeriesBatch::new();
        for key in &self.keys {
            let mut key_data = Vec::new();
            if let Some(buckets) = self.map.series_mut(key) {
                let inside = buckets.split_off(&(window.start + 1));
                let left = std::mem::replace(buckets, inside);
                if self.state_data
                    && let Some((&ts, bucket)) = left.last_key_value()
                    && self.last_prev.get(key).is_none_or(|prev| prev.ts < ts)
                {
                    self.last_prev.insert(key.clone(), Sample::new(ts, bucket.agg_value()));
                }
                key_data.extend(
                    buckets
                        .range(..=window.end)
                        .map(|(&ts, bucket)| Sample::new(ts, bucket.agg_value())),
                );
            }
            if self.state_data {
                let seed = self.last_prev.get(key).map(|s| &s.value);
                merge_state_bounds(&mut key_data, seed, self.limit, window);
            }
            if key_data.len() > self.limit {
                key_data.drain(..key_data.len() - self.limit);
            }
            out.insert(key.clone(), key_data);
        }
        out
    }
}
