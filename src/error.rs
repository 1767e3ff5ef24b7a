//! Error types for configuration, transport and subscription failures.

use thiserror::Error;

/// Invalid construction parameters, rejected before anything is started.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid aggregation interval: {interval}ms, must be greater than 0")]
    InvalidInterval { interval: i64 },

    #[error("invalid row limit: {limit}, must be greater than 0")]
    InvalidLimit { limit: usize },

    #[error("invalid time window: {window}ms, must not be negative")]
    InvalidTimeWindow { window: i64 },

    #[error("invalid fixed window: end {end} is before start {start}")]
    InvalidFixedWindow { start: i64, end: i64 },

    #[error("unknown aggregation type: {0}")]
    UnknownAggregation(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed configuration: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Failures reported by the transport collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport rejected subscription: {0}")]
    Rejected(String),

    #[error("transport connection is closed")]
    Closed,
}

/// Failures surfaced to subscribers and listeners.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("entity datasource has no resolved entity id")]
    UnresolvedEntity,

    #[error("no function registered under name: {name}")]
    UnknownFunction { name: String },

    #[error("timeseries subscription requires a timewindow")]
    MissingTimewindow,

    #[error("upstream error {code}: {message}")]
    Upstream { code: i32, message: String },
}

pub type Result<T, E = SubscriptionError> = std::result::Result<T, E>;
