use std::sync::Arc;
use tracing::error;

use shared::messaging::BrokerSettings;

use crate::error::{ServiceError, ServiceResult};
use crate::producer::MessagePublisher;

/// Message sent back to callers that submit an empty message
pub const EMPTY_MESSAGE: &str = "Message can't be null or empty";

/// The fixed set of topics callers can publish to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Default,
    Topic1,
    Topic2,
}

/// Confirmation that the broker accepted a submitted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub topic: String,
}

/// Validates outbound messages and forwards them to the publisher
pub struct MessageGateway<P> {
    publisher: P,
    settings: Arc<BrokerSettings>,
}

impl<P: MessagePublisher> MessageGateway<P> {
    pub fn new(publisher: P, settings: Arc<BrokerSettings>) -> Self {
        Self { publisher, settings }
    }

    pub fn topic_for(&self, destination: Destination) -> &str {
        match destination {
            Destination::Default => &self.settings.topic,
            Destination::Topic1 => &self.settings.topic1,
            Destination::Topic2 => &self.settings.topic2,
        }
    }

    pub async fn submit(
        &self,
        destination: Destination,
        message: &str,
    ) -> ServiceResult<Submitted> {
        if message.trim().is_empty() {
            error!("Message is null or empty");
            return Err(ServiceError::InvalidArgument(EMPTY_MESSAGE.to_string()));
        }

        let topic = self.topic_for(destination);
        self.publisher.publish(topic, message).await?;

        Ok(Submitted {
            topic: topic.to_string(),
        })
    }
}
