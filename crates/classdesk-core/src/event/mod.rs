//! Durable event distribution.

pub mod bus;

pub use bus::{BusError, EventBus, EventSubscriber};
