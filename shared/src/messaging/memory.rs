//! In-memory broker for tests
//!
//! Keeps a retained log per topic so `Earliest` subscriptions replay history,
//! records every send and acknowledgement, and lets tests inject failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{
    Delivery, InitialPosition, MessageBroker, MessageError, MessageResult, MessageSubscription,
    ProducerSpec, SubscriptionSpec,
};

/// A message recorded by [`MemoryBroker::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub producer_name: String,
    pub batching: bool,
    pub payload: Vec<u8>,
    /// Id the message was stored under
    pub message_id: u64,
}

/// An acknowledgement recorded by a [`MemorySubscription`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub topic: String,
    pub subscription_name: String,
    pub message_id: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryDelivery {
    pub message_id: u64,
    payload: Vec<u8>,
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

type Feed = mpsc::UnboundedSender<MessageResult<MemoryDelivery>>;

#[derive(Default)]
struct State {
    next_id: u64,
    retained: HashMap<String, Vec<MemoryDelivery>>,
    feeds: HashMap<String, Vec<Feed>>,
    sent: Vec<SentMessage>,
    acks: Vec<AckRecord>,
    subscriptions: Vec<SubscriptionSpec>,
    send_failure: Option<MessageError>,
    ack_failures: HashMap<String, usize>,
    failing_subscriptions: HashSet<String>,
}

/// Broker double shared between the test and the code under test
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every payload handed to [`MessageBroker::send`], in order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn acks(&self) -> Vec<AckRecord> {
        self.lock().acks.clone()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionSpec> {
        self.lock().subscriptions.clone()
    }

    /// Make every following send fail with `error`
    pub fn fail_sends(&self, error: MessageError) {
        self.lock().send_failure = Some(error);
    }

    /// Make the next `count` acknowledgements on `topic` fail
    pub fn fail_acks(&self, topic: &str, count: usize) {
        self.lock().ack_failures.insert(topic.to_string(), count);
    }

    /// Make subscribing to `topic` fail
    pub fn fail_subscriptions_to(&self, topic: &str) {
        self.lock().failing_subscriptions.insert(topic.to_string());
    }

    /// Deliver `error` to every open subscription on `topic` as if a receive failed
    pub fn inject_receive_error(&self, topic: &str, error: MessageError) {
        let mut state = self.lock();
        if let Some(feeds) = state.feeds.get_mut(topic) {
            feeds.retain(|feed| feed.send(Err(error.clone())).is_ok());
        }
    }

    /// Publish a raw payload without going through a producer
    pub fn publish_raw(&self, topic: &str, payload: Vec<u8>) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let delivery = MemoryDelivery {
            message_id: state.next_id,
            payload,
        };

        state
            .retained
            .entry(topic.to_string())
            .or_default()
            .push(delivery.clone());

        if let Some(feeds) = state.feeds.get_mut(topic) {
            feeds.retain(|feed| feed.send(Ok(delivery.clone())).is_ok());
        }

        delivery.message_id
    }
}

#[async_trait::async_trait]
impl MessageBroker for MemoryBroker {
    type Subscription = MemorySubscription;

    async fn send(&self, producer: &ProducerSpec, payload: Vec<u8>) -> MessageResult<()> {
        if let Some(error) = self.lock().send_failure.clone() {
            return Err(error);
        }

        let message_id = self.publish_raw(&producer.topic, payload.clone());
        self.lock().sent.push(SentMessage {
            topic: producer.topic.clone(),
            producer_name: producer.producer_name.clone(),
            batching: producer.batching,
            payload,
            message_id,
        });
        Ok(())
    }

    async fn subscribe(&self, spec: &SubscriptionSpec) -> MessageResult<MemorySubscription> {
        let mut state = self.lock();
        if state.failing_subscriptions.contains(&spec.topic) {
            return Err(MessageError::Subscription(format!(
                "cannot subscribe to {}",
                spec.topic
            )));
        }

        let (feed, receiver) = mpsc::unbounded_channel();
        if spec.initial_position == InitialPosition::Earliest {
            for delivery in state.retained.get(&spec.topic).into_iter().flatten() {
                let _ = feed.send(Ok(delivery.clone()));
            }
        }

        state.feeds.entry(spec.topic.clone()).or_default().push(feed);
        state.subscriptions.push(spec.clone());

        Ok(MemorySubscription {
            topic: spec.topic.clone(),
            subscription_name: spec.subscription_name.clone(),
            receiver,
            broker: self.clone(),
        })
    }
}

pub struct MemorySubscription {
    topic: String,
    subscription_name: String,
    receiver: mpsc::UnboundedReceiver<MessageResult<MemoryDelivery>>,
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl MessageSubscription for MemorySubscription {
    type Delivery = MemoryDelivery;

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn receive(&mut self) -> MessageResult<MemoryDelivery> {
        match self.receiver.recv().await {
            Some(result) => result,
            None => Err(MessageError::Disconnected(self.topic.clone())),
        }
    }

    async fn acknowledge(&mut self, delivery: &MemoryDelivery) -> MessageResult<()> {
        let mut state = self.broker.lock();
        if let Some(remaining) = state.ack_failures.get_mut(&self.topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MessageError::Acknowledge(format!(
                    "ack rejected for message {}",
                    delivery.message_id
                )));
            }
        }

        state.acks.push(AckRecord {
            topic: self.topic.clone(),
            subscription_name: self.subscription_name.clone(),
            message_id: delivery.message_id,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_earliest_replays_retained_messages() {
        let broker = MemoryBroker::new();
        broker
            .send(&ProducerSpec::unbatched("mytopic"), b"before".to_vec())
            .await
            .unwrap();

        let spec = SubscriptionSpec::failover("mytopic", "poc", InitialPosition::Earliest);
        let mut subscription = broker.subscribe(&spec).await.unwrap();

        let delivery = subscription.receive().await.unwrap();
        assert_eq!(delivery.text().unwrap(), "before");

        subscription.acknowledge(&delivery).await.unwrap();
        assert_eq!(broker.acks().len(), 1);
    }

    #[tokio::test]
    async fn test_latest_skips_retained_messages() {
        let broker = MemoryBroker::new();
        broker.publish_raw("mytopic", b"old".to_vec());

        let spec = SubscriptionSpec::failover("mytopic", "poc", InitialPosition::Latest);
        let mut subscription = broker.subscribe(&spec).await.unwrap();
        broker.publish_raw("mytopic", b"new".to_vec());

        let delivery = subscription.receive().await.unwrap();
        assert_eq!(delivery.text().unwrap(), "new");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MemoryBroker::new();
        broker.fail_sends(MessageError::Producer("down".to_string()));

        let result = broker
            .send(&ProducerSpec::unbatched("mytopic"), b"x".to_vec())
            .await;
        assert_eq!(result, Err(MessageError::Producer("down".to_string())));
        assert!(broker.sent().is_empty());
    }
}
