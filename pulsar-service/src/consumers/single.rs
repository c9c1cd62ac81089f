use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use shared::messaging::{
    BrokerSettings, Delivery, MessageBroker, MessageSubscription, SubscriptionSpec,
};

use crate::error::ServiceResult;
use crate::supervisor::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Running,
    Stopped,
}

/// Failover consumer on the configured topic and subscription
pub struct SingleConsumer<B> {
    broker: Arc<B>,
    settings: Arc<BrokerSettings>,
    state: watch::Sender<ConsumerState>,
}

impl<B: MessageBroker> SingleConsumer<B> {
    pub fn new(broker: Arc<B>, settings: Arc<BrokerSettings>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            broker,
            settings,
            state,
        }
    }

    pub fn status(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Consume until shutdown is triggered or a receive, decode or
    /// acknowledge call fails. The consumer is `Stopped` either way.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> ServiceResult<()> {
        let result = self.consume(&mut shutdown).await;
        self.state.send_replace(ConsumerState::Stopped);
        result
    }

    async fn consume(&self, shutdown: &mut ShutdownSignal) -> ServiceResult<()> {
        info!(
            "Consuming pulsar events from {} position",
            self.settings.initial_position
        );

        let spec = SubscriptionSpec::failover(
            self.settings.topic.as_str(),
            self.settings.subscription_name.as_str(),
            self.settings.initial_position,
        );
        let mut subscription = self.broker.subscribe(&spec).await?;
        self.state.send_replace(ConsumerState::Running);

        while !shutdown.is_triggered() {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                received = subscription.receive() => received?,
            };

            let message = delivery.text()?;
            info!("Received message: {}", message);

            subscription.acknowledge(&delivery).await?;
        }

        info!(topic = %subscription.topic(), "Consumer stopped");
        Ok(())
    }
}
