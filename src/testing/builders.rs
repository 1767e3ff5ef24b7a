//! Builders for transport-shaped batches.

use crate::value::DataValue;
use crate::window::{Sample, SeriesBatch, TimestampMs};

/// Samples from `(timestamp, value)` pairs.
///
/// ```
/// use telemetry_window::testing::series;
///
/// let s = series(&[(1000, 1.0), (2000, 2.0)]);
/// assert_eq!(s.len(), 2);
/// ```
pub fn series<V: Into<DataValue> + Clone>(points: &[(TimestampMs, V)]) -> Vec<Sample> {
    points.iter().map(|(ts, v)| Sample::new(*ts, v.clone())).collect()
}

/// A fluent builder for a [`SeriesBatch`].
///
/// # Example
///
/// ```
/// use telemetry_window::testing::BatchBuilder;
///
/// let batch = BatchBuilder::new()
///     .sample("temperature", 1000, 21.5)
///     .sample("temperature", 2000, 22.0)
///     .empty_series("humidity")
///     .build();
///
/// assert_eq!(batch["temperature"].len(), 2);
/// assert!(batch["humidity"].is_empty());
/// ```
#[derive(Default)]
pub struct BatchBuilder {
    batch: SeriesBatch,
}

impl BatchBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sample(mut self, series: &str, ts: TimestampMs, value: impl Into<DataValue>) -> Self {
        self.batch.entry(series.to_string()).or_default().push(Sample::new(ts, value));
        self
    }

    #[must_use]
    pub fn samples(mut self, series: &str, samples: Vec<Sample>) -> Self {
        self.batch.entry(series.to_string()).or_default().extend(samples);
        self
    }

    /// Evenly spaced samples `start, start + step, ...` with values from `f(ts)`.
    #[must_use]
    pub fn generated<F>(mut self, series: &str, start: TimestampMs, step: i64, count: usize, f: F) -> Self
    where
        F: Fn(TimestampMs) -> DataValue,
    {
        let entry = self.batch.entry(series.to_string()).or_default();
        let mut ts = start;
        for _ in 0..count {
            entry.push(Sample::new(ts, f(ts)));
            ts += step;
        }
        self
    }

    #[must_use]
    pub fn empty_series(mut self, series: &str) -> Self {
        self.batch.entry(series.to_string()).or_default();
        self
    }

    #[must_use]
    pub fn build(self) -> SeriesBatch {
        self.batch
    }
}
