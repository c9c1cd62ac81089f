//! Messaging seam between the services and the message broker

pub mod pulsar_client;
pub mod settings;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use pulsar_client::PulsarBroker;
pub use settings::{BrokerSettings, InitialPosition};

use std::fmt;

/// Broker abstraction used by producers and consumers.
///
/// One instance is built at process startup and shared read-only by every
/// component that talks to the broker.
#[async_trait::async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    type Subscription: MessageSubscription + 'static;

    /// Send one payload through a producer configured by `producer`.
    ///
    /// Returns once the broker has accepted the message.
    async fn send(&self, producer: &ProducerSpec, payload: Vec<u8>) -> MessageResult<()>;

    /// Create a subscription on a single topic
    async fn subscribe(&self, spec: &SubscriptionSpec) -> MessageResult<Self::Subscription>;
}

/// An open subscription owned by exactly one consumer loop
#[async_trait::async_trait]
pub trait MessageSubscription: Send {
    type Delivery: Delivery;

    fn topic(&self) -> &str;

    /// Wait for the next message on this subscription
    async fn receive(&mut self) -> MessageResult<Self::Delivery>;

    /// Tell the broker the message does not need to be redelivered
    async fn acknowledge(&mut self, delivery: &Self::Delivery) -> MessageResult<()>;
}

/// A received message that still has to be acknowledged
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Decode the payload as UTF-8 text
    fn text(&self) -> MessageResult<String> {
        String::from_utf8(self.payload().to_vec()).map_err(|e| MessageError::Decode(e.to_string()))
    }
}

/// Producer configuration for a single send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSpec {
    pub topic: String,
    pub producer_name: String,
    pub batching: bool,
}

impl ProducerSpec {
    /// Unbatched producer with a freshly generated name
    pub fn unbatched(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            producer_name: format!("Producer-{}", uuid::Uuid::new_v4()),
            batching: false,
        }
    }
}

/// Subscription types supported by the services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    Exclusive,
    Shared,
    Failover,
    KeyShared,
}

/// Everything needed to create one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic: String,
    pub subscription_name: String,
    pub subscription_type: SubscriptionType,
    pub consumer_name: String,
    pub initial_position: InitialPosition,
}

impl SubscriptionSpec {
    /// Failover subscription with a freshly generated consumer name
    pub fn failover(
        topic: impl Into<String>,
        subscription_name: impl Into<String>,
        initial_position: InitialPosition,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscription_name: subscription_name.into(),
            subscription_type: SubscriptionType::Failover,
            consumer_name: format!("Consumer-{}", uuid::Uuid::new_v4()),
            initial_position,
        }
    }
}

/// Message broker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("Acknowledge error: {0}")]
    Acknowledge(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Subscription on {0} was closed by the broker")]
    Disconnected(String),
}

pub type MessageResult<T> = Result<T, MessageError>;

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionType::Exclusive => "Exclusive",
            SubscriptionType::Shared => "Shared",
            SubscriptionType::Failover => "Failover",
            SubscriptionType::KeyShared => "KeyShared",
        };
        f.write_str(name)
    }
}
