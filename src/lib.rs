//! # telemetry-window
//!
//! Windowed aggregation and subscription multiplexing for real-time device
//! telemetry. Raw `(timestamp, value)` samples arrive from a transport, are
//! bucketed into aligned intervals, reduced, and re-emitted as a sliding
//! window to every consumer of the same subscription.
//!
//! ## Key Features
//!
//! - **Windowed aggregation** - MIN, MAX, AVG, SUM, COUNT or last-value buckets over a sliding or fixed window
//! - **Periodic re-emission** - realtime windows slide by whole intervals on a single-slot timer
//! - **State data** - boundary points at window start and end from the last value seen before the window
//! - **Subscription sharing** - equal descriptors share one upstream subscription; late joiners are replayed
//! - **Reconnect continuity** - windows are recomputed and commands rewritten when the transport reconnects
//! - **Function datasources** - locally generated series from named functions
//! - **Deterministic time** - every timer goes through a [`Scheduler`]; tests use [`ManualScheduler`]
//!
//! ## Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use telemetry_window::*;
//! use telemetry_window::testing::{BatchBuilder, MockTransport, RecordingListener};
//!
//! # fn main() -> Result<(), SubscriptionError> {
//! let transport = Rc::new(MockTransport::new());
//! let scheduler = Rc::new(ManualScheduler::new(60_000));
//! let registry = SubscriptionRegistry::new(
//!     transport.clone(),
//!     scheduler.clone(),
//!     FunctionRegistry::new(),
//!     MultiplexerConfig::default(),
//! )?;
//!
//! // Average temperature per second over the last minute.
//! let aggregation = AggregationParams { agg_type: AggregationType::Avg, interval: 1000, limit: 100, ..Default::default() };
//! let timewindow = SubscriptionTimewindow::realtime(scheduler.now(), 0, 60_000, aggregation);
//! let descriptor = SubscriptionDescriptor::entity(
//!     "DEVICE",
//!     "thermostat-1",
//!     vec![SubscriptionDataKey::timeseries("temperature")],
//!     SubscriptionKind::Timeseries,
//!     Some(timewindow),
//! );
//!
//! let listener = RecordingListener::new(descriptor, 0);
//! let handle = registry.subscribe(listener.clone())?;
//!
//! let cmd_id = transport.last_command_id().expect("subscription command sent");
//! transport.deliver(cmd_id, BatchBuilder::new().sample("temperature", 59_500, 21.0).build());
//! assert_eq!(listener.last_data(0).expect("window delivered").len(), 1);
//!
//! registry.unsubscribe(&handle);
//! assert_eq!(registry.subscription_count(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`window`] - samples, batches, bucket alignment and the visible window
//! - [`value`] - number-or-text values and their numeric coercion
//! - [`reducer`] - per-mode bucket variants and the pure fold step
//! - [`aggregator`] - the windowed aggregator
//! - [`state_merge`] - boundary synthesis for state series
//! - [`subscription`] / [`multiplexer`] - shared upstream subscriptions and the listener registry
//! - [`transport`] / [`listener`] - collaborator contracts
//! - [`scheduler`] - timer abstraction, virtual and tokio-backed
//! - [`metrics`] - diagnostic counters
//! - [`testing`] - mock transport, recording listener, builders and assertions

pub mod aggregator;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod functions;
pub mod listener;
pub mod metrics;
pub mod multiplexer;
pub mod reducer;
pub mod scheduler;
pub mod state_merge;
pub mod subscription;
pub mod testing;
pub mod transport;
pub mod value;
pub mod window;

pub use aggregator::{AggregatorOptions, DataAggregator, DataCallback, UpdateKind};
pub use config::{AggregationParams, AggregationType, FixedWindow, MultiplexerConfig, SubscriptionTimewindow};
pub use descriptor::{
    DataKeyType, DatasourceType, DescriptorKey, SubscriptionDataKey, SubscriptionDescriptor, SubscriptionKind,
};
pub use error::{ConfigError, SubscriptionError, TransportError};
pub use functions::FunctionRegistry;
pub use listener::DatasourceListener;
pub use metrics::MetricsCollector;
pub use multiplexer::{ListenerHandle, SubscriptionRegistry};
pub use scheduler::{ManualScheduler, Scheduler};
#[cfg(feature = "tokio-scheduler")]
pub use scheduler::TokioScheduler;
pub use state_merge::{merge_state_bounds, merge_state_history};
pub use transport::{SubscriptionUpdate, TelemetryCommand, TelemetrySubscriber, Transport};
pub use value::DataValue;
pub use window::{Sample, SeriesBatch, TimestampMs, VisibleWindow};
