use std::sync::Arc;
use tracing::info;

use shared::messaging::{MessageBroker, MessageResult, ProducerSpec};

/// Anything that can deliver one text message to one topic
#[async_trait::async_trait]
pub trait MessagePublisher: Send + Sync + 'static {
    /// Send `message` to `topic` as raw UTF-8 bytes.
    ///
    /// Resolves once the broker accepted the message. Failures are returned
    /// as-is and never retried here.
    async fn publish(&self, topic: &str, message: &str) -> MessageResult<()>;
}

/// Publishes text messages, one scoped producer per call
pub struct Publisher<B> {
    broker: Arc<B>,
}

impl<B: MessageBroker> Publisher<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }
}

#[async_trait::async_trait]
impl<B: MessageBroker> MessagePublisher for Publisher<B> {
    async fn publish(&self, topic: &str, message: &str) -> MessageResult<()> {
        let producer = ProducerSpec::unbatched(topic);

        info!(topic = %topic, producer = %producer.producer_name, "Sending message {}", message);

        self.broker.send(&producer, message.as_bytes().to_vec()).await
    }
}
