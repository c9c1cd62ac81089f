//! Apache Pulsar implementation of the messaging seam
//!
//! Connection handling and the wire protocol belong to the `pulsar` crate.
//! This module only maps producer and subscription specs onto its builders.

use futures::TryStreamExt;
use pulsar::consumer::{ConsumerOptions, InitialPosition as PulsarInitialPosition};
use pulsar::producer::ProducerOptions;
use pulsar::{Authentication, Consumer, Pulsar, SubType, TokioExecutor};
use tracing::{debug, info, warn};

use super::{
    BrokerSettings, Delivery, InitialPosition, MessageBroker, MessageError, MessageResult,
    MessageSubscription, ProducerSpec, SubscriptionSpec, SubscriptionType,
};

/// Process-wide Pulsar client
#[derive(Clone)]
pub struct PulsarBroker {
    client: Pulsar<TokioExecutor>,
}

impl PulsarBroker {
    /// Connect to the cluster described by `settings`
    pub async fn connect(settings: &BrokerSettings) -> MessageResult<Self> {
        let mut builder = Pulsar::builder(settings.url.clone(), TokioExecutor)
            .with_allow_insecure_connection(settings.allow_insecure_connection);

        if let Some(token) = settings.auth_token() {
            builder = builder.with_auth(Authentication {
                name: "token".to_string(),
                data: token.as_bytes().to_vec(),
            });
        }

        let client = builder
            .build()
            .await
            .map_err(|e| MessageError::Connection(e.to_string()))?;

        info!(url = %settings.url, "Connected to Pulsar");
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl MessageBroker for PulsarBroker {
    type Subscription = PulsarSubscription;

    async fn send(&self, spec: &ProducerSpec, payload: Vec<u8>) -> MessageResult<()> {
        // No batch size means every message goes out on its own.
        // Compression is left at its default, which is none.
        let options = ProducerOptions {
            batch_size: if spec.batching { Some(1000) } else { None },
            ..Default::default()
        };

        let mut producer = self
            .client
            .producer()
            .with_topic(spec.topic.as_str())
            .with_name(spec.producer_name.as_str())
            .with_options(options)
            .build()
            .await
            .map_err(|e| MessageError::Producer(e.to_string()))?;

        let receipt = producer
            .send_non_blocking(payload)
            .await
            .map_err(|e| MessageError::Producer(e.to_string()))?;
        receipt
            .await
            .map_err(|e| MessageError::Producer(e.to_string()))?;

        debug!(topic = %spec.topic, producer = %spec.producer_name, "Message accepted by broker");

        if let Err(e) = producer.close().await {
            warn!(producer = %spec.producer_name, "Failed to close producer: {}", e);
        }

        Ok(())
    }

    async fn subscribe(&self, spec: &SubscriptionSpec) -> MessageResult<PulsarSubscription> {
        let options = ConsumerOptions {
            initial_position: match spec.initial_position {
                InitialPosition::Earliest => PulsarInitialPosition::Earliest,
                InitialPosition::Latest => PulsarInitialPosition::Latest,
            },
            ..Default::default()
        };

        let consumer: Consumer<Vec<u8>, TokioExecutor> = self
            .client
            .consumer()
            .with_topic(spec.topic.as_str())
            .with_subscription(spec.subscription_name.as_str())
            .with_subscription_type(sub_type(spec.subscription_type))
            .with_consumer_name(spec.consumer_name.as_str())
            .with_options(options)
            .build()
            .await
            .map_err(|e| MessageError::Subscription(e.to_string()))?;

        info!(
            topic = %spec.topic,
            subscription = %spec.subscription_name,
            consumer = %spec.consumer_name,
            "Subscribed ({})",
            spec.subscription_type
        );

        Ok(PulsarSubscription {
            topic: spec.topic.clone(),
            consumer,
        })
    }
}

fn sub_type(subscription_type: SubscriptionType) -> SubType {
    match subscription_type {
        SubscriptionType::Exclusive => SubType::Exclusive,
        SubscriptionType::Shared => SubType::Shared,
        SubscriptionType::Failover => SubType::Failover,
        SubscriptionType::KeyShared => SubType::KeyShared,
    }
}

/// Pulsar consumer bound to a single topic
pub struct PulsarSubscription {
    topic: String,
    consumer: Consumer<Vec<u8>, TokioExecutor>,
}

#[async_trait::async_trait]
impl MessageSubscription for PulsarSubscription {
    type Delivery = pulsar::consumer::Message<Vec<u8>>;

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn receive(&mut self) -> MessageResult<Self::Delivery> {
        match self.consumer.try_next().await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(MessageError::Disconnected(self.topic.clone())),
            Err(e) => Err(MessageError::Receive(e.to_string())),
        }
    }

    async fn acknowledge(&mut self, delivery: &Self::Delivery) -> MessageResult<()> {
        self.consumer
            .ack(delivery)
            .await
            .map_err(|e| MessageError::Acknowledge(e.to_string()))
    }
}

impl Delivery for pulsar::consumer::Message<Vec<u8>> {
    fn payload(&self) -> &[u8] {
        &self.payload.data
    }
}
