//! Shared messaging, settings and observability for the Pulsar PoC services

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use uuid;

pub mod messaging;
pub mod observability;

pub use messaging::{
    BrokerSettings, Delivery, InitialPosition, MessageBroker, MessageError, MessageResult,
    MessageSubscription, ProducerSpec, PulsarBroker, SubscriptionSpec, SubscriptionType,
};
