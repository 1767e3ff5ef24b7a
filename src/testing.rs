//! Test doubles and helpers for code built on this crate.
//!
//! - **Mock transport**: [`MockTransport`] records every command and lets a
//!   test push updates, errors and reconnects to the registered subscribers.
//! - **Recording listener**: [`RecordingListener`] captures every
//!   `data_updated` call and error.
//! - **Builders**: [`BatchBuilder`] and [`series`] for transport-shaped batches.
//! - **Assertions**: compare sample slices with readable failure output.
//!
//! Time is driven by [`ManualScheduler`](crate::scheduler::ManualScheduler).
//!
//! # Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use telemetry_window::config::MultiplexerConfig;
//! use telemetry_window::descriptor::{SubscriptionDataKey, SubscriptionDescriptor, SubscriptionKind};
//! use telemetry_window::functions::FunctionRegistry;
//! use telemetry_window::multiplexer::SubscriptionRegistry;
//! use telemetry_window::scheduler::ManualScheduler;
//! use telemetry_window::testing::*;
//! use telemetry_window::value::DataValue;
//!
//! # fn main() -> Result<(), telemetry_window::error::SubscriptionError> {
//! let transport = Rc::new(MockTransport::new());
//! let scheduler = Rc::new(ManualScheduler::new(0));
//! let registry = SubscriptionRegistry::new(
//!     transport.clone(),
//!     scheduler.clone(),
//!     FunctionRegistry::new(),
//!     MultiplexerConfig::default(),
//! )?;
//!
//! let descriptor = SubscriptionDescriptor::entity(
//!     "DEVICE",
//!     "dev-1",
//!     vec![SubscriptionDataKey::attribute("firmware")],
//!     SubscriptionKind::Latest,
//!     None,
//! );
//! let listener = RecordingListener::new(descriptor, 0);
//! registry.subscribe(listener.clone())?;
//!
//! let cmd_id = transport.last_command_id().expect("a command was sent");
//! transport.deliver(cmd_id, BatchBuilder::new().sample("firmware", 10, "1.2.0").build());
//! assert_eq!(listener.last_data(0).expect("delivered")[0].value, DataValue::from("1.2.0"));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod builders;
pub mod listener;
pub mod mock_transport;

pub use assertions::*;
pub use builders::*;
pub use listener::*;
pub use mock_transport::*;
