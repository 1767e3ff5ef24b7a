use crate::value::DataValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since UNIX epoch (UTC).
pub type TimestampMs = i64;

/// One year in milliseconds, the lookback used for first-state requests.
pub const YEAR_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// A timestamped value of one series.
///
/// Serialized as a `[timestamp, value]` pair, the shape the transport uses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(TimestampMs, DataValue)", into = "(TimestampMs, DataValue)")]
pub struct Sample {
    pub ts: TimestampMs,
    pub value: DataValue,
}

impl Sample {
    #[inline]
    pub fn new(ts: TimestampMs, value: impl Into<DataValue>) -> Self {
        Self { ts, value: value.into() }
    }
}

impl From<(TimestampMs, DataValue)> for Sample {
    fn from((ts, value): (TimestampMs, DataValue)) -> Self {
        Self { ts, value }
    }
}

impl From<Sample> for (TimestampMs, DataValue) {
    fn from(s: Sample) -> Self {
        (s.ts, s.value)
    }
}

/// Samples grouped by series name, as delivered by the transport or emitted by an aggregator.
pub type SeriesBatch = BTreeMap<String, Vec<Sample>>;

/// The visible range of an aggregator: `(start, end]`.
///
/// Buckets whose key is `<= start` have left the window; keys in
/// `(start, end]` are emitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibleWindow {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl VisibleWindow {
    #[inline]
    pub fn new(start: TimestampMs, width: i64) -> Self {
        debug_assert!(width >= 0);
        Self { start, end: start + width }
    }

    #[inline]
    pub fn contains(&self, ts: TimestampMs) -> bool {
        ts > self.start && ts <= self.end
    }

    /// Move both bounds forward by `steps` whole intervals.
    #[inline]
    pub fn slide(&mut self, steps: i64, interval: i64) {
        self.start += steps * interval;
        self.end += steps * interval;
    }
}

/// Aligned bucket key for a sample at `ts`:
/// `start + floor((ts - start) / interval) * interval + interval / 2`.
///
/// `interval` must be > 0.
#[inline]
pub fn bucket_ts(ts: TimestampMs, start: TimestampMs, interval: i64) -> TimestampMs {
    debug_assert!(interval > 0);
    let k = div_floor(ts - start, interval);
    start + k * interval + interval / 2
}

/// Floor division for i64 (unlike `/` which truncates toward zero).
#[inline]
pub fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r > 0) != (b > 0)) { q - 1 } else { q }
}

/// Sort samples ascending by timestamp. Stable, so equal timestamps keep arrival order.
#[inline]
pub fn sort_by_ts(samples: &mut [Sample]) {
    samples.sort_by_key(|s| s.ts);
}
