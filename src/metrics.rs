//! Diagnostic counters for the aggregation core.
//!
//! A [`MetricsCollector`] is a cheap, cloneable handle. The registry owns one
//! and hands clones to every subscription and aggregator it creates, so all
//! counters of one pipeline land in the same place.
//!
//! # Example
//!
//! ```
//! use telemetry_window::metrics::{MetricsCollector, names};
//!
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(names::NAN_COERCIONS, 2);
//! assert_eq!(metrics.counter(names::NAN_COERCIONS), 2);
//! ```

use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Names of the built-in metrics.
pub mod names {
    /// Values that became `NaN` when coerced for aggregation.
    pub const NAN_COERCIONS: &str = "nan_coercions";
    /// Windows handed to an aggregator's delivery callback.
    pub const AGGREGATOR_DELIVERIES: &str = "aggregator_deliveries";
    pub const UPSTREAM_SUBSCRIPTIONS_CREATED: &str = "upstream_subscriptions_created";
    pub const UPSTREAM_SUBSCRIPTIONS_CLOSED: &str = "upstream_subscriptions_closed";
    /// Calls of `DatasourceListener::data_updated`.
    pub const LISTENER_UPDATES: &str = "listener_updates";
    pub const TRANSPORT_IDLE_CLOSES: &str = "transport_idle_closes";
    /// Gauge: upstream subscriptions currently alive.
    pub const ACTIVE_SUBSCRIPTIONS: &str = "active_subscriptions";
}

/// A named value that can be reported as JSON.
pub trait Metric: Send + Any {
    fn name(&self) -> &str;

    fn value(&self) -> Value;

    fn description(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Thread-safe metric registry.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<HashMap<String, Box<dyn Metric>>>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Box<dyn Metric>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a metric, replacing any metric with the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().insert(metric.name().to_string(), metric);
    }

    /// Add `value` to a counter, creating it at zero first if needed.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        if let Some(counter) = inner
            .get_mut(name)
            .and_then(|m| m.as_any_mut().downcast_mut::<CounterMetric>())
        {
            counter.count += value;
            return;
        }
        inner.insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock().insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    /// Current value of a counter; zero when it was never touched.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock()
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, |c| c.count)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut inner = self.lock();
        if let Some(gauge) = inner
            .get_mut(name)
            .and_then(|m| m.as_any_mut().downcast_mut::<GaugeMetric>())
        {
            gauge.value = value;
            return;
        }
        inner.insert(name.to_string(), Box::new(GaugeMetric::new(name, value)));
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.lock()
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<GaugeMetric>())
            .map(|g| g.value)
    }

    /// All metrics as a JSON object of `{ name: { value, description? } }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();
        for (name, metric) in inner.iter() {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }
        Value::Object(metrics_json)
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock()
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    /// A counter starting at zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self { name: name.into(), count }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A gauge holding the last value set.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, description: None }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
