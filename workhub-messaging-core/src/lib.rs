//! Event propagation between workhub services.
//!
//! Services keep local replicas of people and service offerings owned by
//! other services. Replicas are fed by events on topic exchanges, addressed
//! by routing keys of the form `source.entity.action_destination`.
//!
//! - [`routing`]: encode/decode of routing keys and topic pattern matching.
//! - [`producer::Publisher`]: fan-out of one committed write to its interest set.
//! - [`Dispatcher`]: consumer-side filtering and routing to replica handlers.
//! - [`replica`]: idempotent handlers and the store contract they write through.
//! - [`catalog`]: declared event types, destinations and queue topology.

pub mod bus;
pub mod catalog;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod memory;
pub mod producer;
pub mod replica;
pub mod routing;
pub mod telemetry;
pub mod types;

pub use bus::EventBus;
pub use dispatch::{DispatchOutcome, DispatchTable, Dispatcher, DropReason};
pub use error::MessagingError;
pub use handler::{AckMode, EventCallback};
pub use memory::InMemoryBroker;
pub use producer::{FanOutReport, PublishAttempt, Publisher};
pub use routing::RoutingKey;
pub use types::Envelope;
