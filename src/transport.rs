//! Contract with the telemetry transport.
//!
//! The transport owns the persistent connection. Subscriptions hand it a
//! [`TelemetrySubscriber`]; the transport sends the subscriber's commands,
//! routes every [`SubscriptionUpdate`] back to it by command id, and after a
//! reconnect calls [`TelemetrySubscriber::on_reconnected`] before sending the
//! (possibly rewritten) commands again.
//!
//! Commands serialize to the wire shape of the telemetry endpoint; a batch of
//! them goes out as a [`CommandsWrapper`].

use crate::config::AggregationType;
use crate::error::TransportError;
use crate::window::{SeriesBatch, TimestampMs};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub type CommandId = u64;

/// Error codes carried by a [`SubscriptionUpdate`].
pub mod error_codes {
    pub const NO_ERROR: i32 = 0;
    pub const INTERNAL_ERROR: i32 = 1;
    pub const BAD_REQUEST: i32 = 2;
    pub const UNAUTHORIZED: i32 = 3;
}

/// One-shot request for a fixed range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHistoryCmd {
    pub cmd_id: CommandId,
    pub entity_type: String,
    pub entity_id: String,
    /// Comma-separated series names.
    pub keys: String,
    pub start_ts: TimestampMs,
    pub end_ts: TimestampMs,
    pub interval: i64,
    pub limit: usize,
    pub agg: AggregationType,
}

/// Persistent timeseries subscription. The window fields are only set for timeseries kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesSubscriptionCmd {
    pub cmd_id: CommandId,
    pub entity_type: String,
    pub entity_id: String,
    pub keys: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<AggregationType>,
    #[serde(default)]
    pub unsubscribe: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributesSubscriptionCmd {
    pub cmd_id: CommandId,
    pub entity_type: String,
    pub entity_id: String,
    pub keys: String,
    #[serde(default)]
    pub unsubscribe: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryCommand {
    History(GetHistoryCmd),
    Timeseries(TimeseriesSubscriptionCmd),
    Attributes(AttributesSubscriptionCmd),
}

impl TelemetryCommand {
    #[must_use]
    pub fn cmd_id(&self) -> CommandId {
        match self {
            TelemetryCommand::History(c) => c.cmd_id,
            TelemetryCommand::Timeseries(c) => c.cmd_id,
            TelemetryCommand::Attributes(c) => c.cmd_id,
        }
    }

    /// The same command flagged as an unsubscribe. History commands have nothing to cancel.
    #[must_use]
    pub fn to_unsubscribe(&self) -> Option<TelemetryCommand> {
        match self {
            TelemetryCommand::History(_) => None,
            TelemetryCommand::Timeseries(c) => Some(TelemetryCommand::Timeseries(TimeseriesSubscriptionCmd {
                unsubscribe: true,
                ..c.clone()
            })),
            TelemetryCommand::Attributes(c) => Some(TelemetryCommand::Attributes(AttributesSubscriptionCmd {
                unsubscribe: true,
                ..c.clone()
            })),
        }
    }
}

/// Wire envelope grouping commands by kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsWrapper {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attr_sub_cmds: Vec<AttributesSubscriptionCmd>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ts_sub_cmds: Vec<TimeseriesSubscriptionCmd>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history_cmds: Vec<GetHistoryCmd>,
}

impl CommandsWrapper {
    #[must_use]
    pub fn from_commands<'a>(commands: impl IntoIterator<Item = &'a TelemetryCommand>) -> Self {
        let mut out = Self::default();
        for cmd in commands {
            match cmd {
                TelemetryCommand::History(c) => out.history_cmds.push(c.clone()),
                TelemetryCommand::Timeseries(c) => out.ts_sub_cmds.push(c.clone()),
                TelemetryCommand::Attributes(c) => out.attr_sub_cmds.push(c.clone()),
            }
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attr_sub_cmds.is_empty() && self.ts_sub_cmds.is_empty() && self.history_cmds.is_empty()
    }
}

/// A message for one command: data, or an error code.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdate {
    pub subscription_id: CommandId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub data: SeriesBatch,
}

impl SubscriptionUpdate {
    #[must_use]
    pub fn data(subscription_id: CommandId, data: SeriesBatch) -> Self {
        Self { subscription_id, data, ..Self::default() }
    }

    #[must_use]
    pub fn error(subscription_id: CommandId, error_code: i32, error_msg: impl Into<String>) -> Self {
        Self { subscription_id, error_code, error_msg: Some(error_msg.into()), data: SeriesBatch::new() }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code != error_codes::NO_ERROR
    }
}

/// Receives the updates of the commands it owns.
pub trait TelemetrySubscriber {
    /// Commands to send, reflecting any rewrite done in [`Self::on_reconnected`].
    fn commands(&self) -> Vec<TelemetryCommand>;

    fn on_update(&self, update: SubscriptionUpdate);

    /// Called after the connection is re-established and before the commands are re-sent.
    fn on_reconnected(&self) {}
}

/// Opaque registration returned by [`Transport::subscribe`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

pub trait Transport {
    /// Register `subscriber` and send its commands, opening the connection if needed.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when the request is rejected.
    fn subscribe(&self, subscriber: Rc<dyn TelemetrySubscriber>) -> Result<SubscriptionHandle, TransportError>;

    /// Cancel the subscriber's commands. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Commands sent but not yet acknowledged.
    fn has_pending_commands(&self) -> bool;

    /// Close the connection. The next subscribe reopens it.
    fn close(&self);
}
