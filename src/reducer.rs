//! Bucket reducers: MIN, MAX, AVG, SUM, COUNT and NONE (last value wins).
//!
//! A [`Bucket`] is a tagged variant chosen once from the configured
//! [`AggregationType`]; each variant carries only what its reducer needs.
//! [`fold`] is the pure step `bucket, value -> bucket'`.
//!
//! Arithmetic follows float semantics all the way: a `NaN` input poisons
//! MIN, MAX, SUM and AVG buckets instead of being skipped.

use crate::config::AggregationType;
use crate::value::DataValue;
use crate::window::TimestampMs;
use std::collections::{BTreeMap, HashMap};

/// Aggregated state of one time bucket.
#[derive(Clone, Debug, PartialEq)]
pub enum Bucket {
    Avg { count: u64, sum: f64 },
    Min(f64),
    Max(f64),
    Sum(f64),
    Count(f64),
    Last(DataValue),
}

impl Bucket {
    /// Bucket holding a single raw sample.
    #[must_use]
    pub fn seed(mode: AggregationType, value: DataValue) -> Self {
        match mode {
            AggregationType::Avg => Bucket::Avg { count: 1, sum: value.to_number() },
            AggregationType::Min => Bucket::Min(value.to_number()),
            AggregationType::Max => Bucket::Max(value.to_number()),
            AggregationType::Sum => Bucket::Sum(value.to_number()),
            AggregationType::Count => Bucket::Count(1.0),
            AggregationType::None => Bucket::Last(value),
        }
    }

    /// Bucket rebuilt from a value the server already reduced.
    ///
    /// Only COUNT differs from [`Bucket::seed`]: the incoming value is the count itself.
    #[must_use]
    pub fn from_aggregate(mode: AggregationType, value: DataValue) -> Self {
        match mode {
            AggregationType::Count => Bucket::Count(value.to_number()),
            _ => Bucket::seed(mode, value),
        }
    }

    /// The value emitted for this bucket.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn agg_value(&self) -> DataValue {
        match self {
            Bucket::Avg { count, sum } => DataValue::Number(sum / *count as f64),
            Bucket::Min(v) | Bucket::Max(v) | Bucket::Sum(v) | Bucket::Count(v) => DataValue::Number(*v),
            Bucket::Last(v) => v.clone(),
        }
    }
}

/// Fold one value into a bucket.
#[must_use]
pub fn fold(bucket: Bucket, value: DataValue) -> Bucket {
    match bucket {
        Bucket::Avg { count, sum } => Bucket::Avg { count: count + 1, sum: sum + value.to_number() },
        Bucket::Min(cur) => Bucket::Min(nan_min(cur, value.to_number())),
        Bucket::Max(cur) => Bucket::Max(nan_max(cur, value.to_number())),
        Bucket::Sum(cur) => Bucket::Sum(cur + value.to_number()),
        Bucket::Count(c) => Bucket::Count(c + 1.0),
        Bucket::Last(_) => Bucket::Last(value),
    }
}

/// Coerce a raw sample value for folding.
///
/// With aggregation enabled every value becomes a number (possibly `NaN`).
/// Without it, numeric values become numbers and anything else passes through.
#[must_use]
pub fn prepare(mode: AggregationType, raw: &DataValue) -> DataValue {
    if mode.is_enabled() || raw.is_numeric() {
        DataValue::Number(raw.to_number())
    } else {
        raw.clone()
    }
}

// f64::min/max drop NaN; these keep it.
fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

/// Per-series buckets, ordered by bucket timestamp.
#[derive(Clone, Debug, Default)]
pub struct AggregationMap {
    series: HashMap<String, BTreeMap<TimestampMs, Bucket>>,
}

impl AggregationMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a prepared value into the bucket at `key`, seeding it if absent.
    pub fn fold_value(&mut self, series: &str, key: TimestampMs, mode: AggregationType, value: DataValue) {
        let buckets = self.series.entry(series.to_string()).or_default();
        let next = match buckets.remove(&key) {
            Some(existing) => fold(existing, value),
            None => Bucket::seed(mode, value),
        };
        buckets.insert(key, next);
    }

    /// Insert a server-reduced value; a duplicate timestamp folds into the existing bucket.
    pub fn insert_aggregate(&mut self, series: &str, key: TimestampMs, mode: AggregationType, value: DataValue) {
        let buckets = self.series.entry(series.to_string()).or_default();
        let next = match buckets.remove(&key) {
            Some(existing) => fold(existing, value),
            None => Bucket::from_aggregate(mode, value),
        };
        buckets.insert(key, next);
    }

    /// Make sure a series exists even when no sample arrived for it.
    pub fn ensure_series(&mut self, series: &str) {
        self.series.entry(series.to_string()).or_default();
    }

    #[must_use]
    pub fn series(&self, name: &str) -> Option<&BTreeMap<TimestampMs, Bucket>> {
        self.series.get(name)
    }

    pub fn series_mut(&mut self, name: &str) -> Option<&mut BTreeMap<TimestampMs, Bucket>> {
        self.series.get_mut(name)
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_all(mode: AggregationType, values: &[f64]) -> DataValue {
        let mut it = values.iter().map(|v| DataValue::Number(*v));
        let first = it.next().expect("at least one value");
        it.fold(Bucket::seed(mode, first), fold).agg_value()
    }

    #[test]
    fn count_seed_ignores_the_value() {
        assert_eq!(Bucket::seed(AggregationType::Count, DataValue::Number(42.0)).agg_value(), DataValue::Number(1.0));
        assert_eq!(
            Bucket::from_aggregate(AggregationType::Count, DataValue::Number(42.0)).agg_value(),
            DataValue::Number(42.0)
        );
    }

    #[test]
    fn min_keeps_nan() {
        let v = fold_all(AggregationType::Min, &[3.0, f64::NAN, 1.0]);
        assert!(v.to_number().is_nan());
    }

    #[test]
    fn none_keeps_text_untouched() {
        let raw = DataValue::from("on");
        assert_eq!(prepare(AggregationType::None, &raw), raw);
        assert!(prepare(AggregationType::Avg, &raw).to_number().is_nan());
        assert_eq!(prepare(AggregationType::None, &DataValue::from("12")), DataValue::Number(12.0));
    }
}
