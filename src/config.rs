//! Aggregation, timewindow and multiplexer configuration.
//!
//! All structs deserialize from the camelCase JSON the dashboard produces and
//! carry a `validate()` that rejects invalid parameters eagerly.

use crate::error::ConfigError;
use crate::window::{TimestampMs, VisibleWindow, YEAR_MS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum period of the aggregator tick, whatever the interval.
pub const MIN_AGGREGATION_TICK_MS: i64 = 1000;

/// Reducer applied to the samples of one bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationType {
    Min,
    Max,
    #[default]
    Avg,
    Sum,
    Count,
    /// No aggregation: bucket key is the raw timestamp, last value wins.
    None,
}

impl AggregationType {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != AggregationType::None
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationType::Min => "MIN",
            AggregationType::Max => "MAX",
            AggregationType::Avg => "AVG",
            AggregationType::Sum => "SUM",
            AggregationType::Count => "COUNT",
            AggregationType::None => "NONE",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MIN" => Ok(AggregationType::Min),
            "MAX" => Ok(AggregationType::Max),
            "AVG" => Ok(AggregationType::Avg),
            "SUM" => Ok(AggregationType::Sum),
            "COUNT" => Ok(AggregationType::Count),
            "NONE" => Ok(AggregationType::None),
            _ => Err(ConfigError::UnknownAggregation(s.to_string())),
        }
    }
}

/// Aggregation parameters of a timeseries subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationParams {
    #[serde(rename = "type", default)]
    pub agg_type: AggregationType,
    /// Bucket width in milliseconds.
    pub interval: i64,
    /// Width of the visible window in milliseconds.
    #[serde(default)]
    pub time_window: i64,
    /// Maximum number of rows emitted per series.
    pub limit: usize,
    /// Values persist between change events.
    #[serde(default)]
    pub state_data: bool,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            agg_type: AggregationType::Avg,
            interval: 1000,
            time_window: 0,
            limit: 200,
            state_data: false,
        }
    }
}

impl AggregationParams {
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

/// A fixed (historical) time range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedWindow {
    /// Start of the range, epoch milliseconds.
    pub start_time_ms: TimestampMs,
    pub end_time_ms: TimestampMs,
}

/// The time range a subscription covers: a sliding realtime window or a fixed history window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTimewindow {
    /// Exclusive start of the visible window.
    #[serde(default)]
    pub start_ts: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_window_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_window: Option<FixedWindow>,
    pub aggregation: AggregationParams,
}

impl SubscriptionTimewindow {
    /// Realtime window ending at server "now" (`now + st_diff`).
    ///
    /// The start is aligned down to a whole interval; when it moves, the
    /// aggregation window grows by one interval so the requested span stays covered.
    #[must_use]
    pub fn realtime(
        now: TimestampMs,
        st_diff: i64,
        window_ms: i64,
        mut aggregation: AggregationParams,
    ) -> Self {
        let mut start_ts = now + st_diff - window_ms;
        let mut agg_window = window_ms;
        if aggregation.interval > 0 {
            let start_diff = start_ts.rem_euclid(aggregation.interval);
            if start_diff != 0 {
                start_ts -= start_diff;
                agg_window += aggregation.interval;
            }
        }
        aggregation.time_window = agg_window;
        Self {
            start_ts,
            realtime_window_ms: Some(window_ms),
            fixed_window: None,
            aggregation,
        }
    }

    #[must_use]
    pub fn history(start: TimestampMs, end: TimestampMs, mut aggregation: AggregationParams) -> Self {
        aggregation.time_window = end - start;
        Self {
            start_ts: start,
            realtime_window_ms: None,
            fixed_window: Some(FixedWindow { start_time_ms: start, end_time_ms: end }),
            aggregation,
        }
    }

    #[must_use]
    pub fn is_history(&self) -> bool {
        self.fixed_window.is_some()
    }

    #[must_use]
    pub fn is_realtime(&self) -> bool {
        self.realtime_window_ms.is_some()
    }

    #[must_use]
    pub fn visible_window(&self) -> VisibleWindow {
        VisibleWindow::new(self.start_ts, self.aggregation.time_window)
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` when the aggregation parameters or the fixed range are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregation.validate()?;
        if let Some(fw) = self.fixed_window
            && fw.end_time_ms < fw.start_time_ms
        {
            return Err(ConfigError::InvalidFixedWindow { start: fw.start_time_ms, end: fw.end_time_ms });
        }
        if let Some(w) = self.realtime_window_ms
            && w < 0
        {
            return Err(ConfigError::InvalidTimeWindow { window: w });
        }
        Ok(())
    }
}

/// Settings of the subscription registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiplexerConfig {
    /// Close the transport after this long without any subscription.
    pub idle_timeout_ms: i64,
    /// How far back the first-state request looks for the last value before a window.
    pub first_state_lookback_ms: i64,
    /// Upper bound of the generation period of function-backed timeseries.
    pub max_function_frequency_ms: i64,
    /// Generation period of function-backed latest values.
    pub latest_function_frequency_ms: i64,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 10_000,
            first_state_lookback_ms: YEAR_MS,
            max_function_frequency_ms: 5000,
            latest_function_frequency_ms: 1000,
        }
    }
}

impl MultiplexerConfig {
    /// # Errors
    ///
    /// Returns a `ConfigError` when the JSON is malformed or a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first non-positive field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("idleTimeoutMs", self.idle_timeout_ms),
            ("firstStateLookbackMs", self.first_state_lookback_ms),
            ("maxFunctionFrequencyMs", self.max_function_frequency_ms),
            ("latestFunctionFrequencyMs", self.latest_function_frequency_ms),
        ];
        for (field, v) in positive {
            if v <= 0 {
                return Err(ConfigError::InvalidField { field, reason: format!("{v} must be greater than 0") });
            }
        }
        Ok(())
    }
}
