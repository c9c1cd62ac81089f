//! Fan-out consumer
//!
//! One subscription per topic, each drained by its own task. A failing
//! iteration is logged and the loop keeps going, so one broken topic never
//! stalls the others. All loops share the same shutdown signal.

use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use shared::messaging::{
    Delivery, InitialPosition, MessageBroker, MessageResult, MessageSubscription, SubscriptionSpec,
};

use crate::error::ServiceResult;
use crate::supervisor::ShutdownSignal;

/// Outcome of one receive, decode and acknowledge pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Handled,
    Cancelled,
}

pub fn subscription_name(topic: &str) -> String {
    format!("{}-subscription-name", topic)
}

pub struct MultiConsumer<S> {
    subscriptions: Vec<S>,
    error_backoff: Duration,
}

impl<S: MessageSubscription + 'static> MultiConsumer<S> {
    /// Subscribe to every topic before any loop starts.
    ///
    /// A single failed subscription fails the whole consumer.
    pub async fn start<B>(
        broker: &B,
        topics: &[String],
        error_backoff: Duration,
    ) -> ServiceResult<Self>
    where
        B: MessageBroker<Subscription = S>,
    {
        let mut subscriptions = Vec::with_capacity(topics.len());

        for topic in topics {
            let spec = SubscriptionSpec::failover(
                topic.as_str(),
                subscription_name(topic),
                InitialPosition::Latest,
            );
            subscriptions.push(broker.subscribe(&spec).await?);
            info!(topic = %topic, "Subscribed to topic");
        }

        Ok(Self {
            subscriptions,
            error_backoff,
        })
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|subscription| subscription.topic().to_string())
            .collect()
    }

    /// Run one loop per subscription and wait until all of them exited.
    ///
    /// Dropping the returned future aborts every loop still running.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServiceResult<()> {
        let mut loops = JoinSet::new();
        for subscription in self.subscriptions {
            loops.spawn(consume_topic(subscription, shutdown.clone(), self.error_backoff));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Consumer loop panicked: {}", e);
            }
        }

        info!("All consumer loops stopped");
        Ok(())
    }
}

async fn consume_topic<S: MessageSubscription>(
    mut subscription: S,
    mut shutdown: ShutdownSignal,
    error_backoff: Duration,
) {
    let topic = subscription.topic().to_string();

    loop {
        debug!(thread = ?std::thread::current().id(), topic = %topic, "Waiting for message");

        match consume_once(&mut subscription, &mut shutdown).await {
            Ok(Iteration::Handled) => {
                debug!(thread = ?std::thread::current().id(), topic = %topic, "Message handled");
            }
            Ok(Iteration::Cancelled) => break,
            Err(e) => {
                error!(topic = %topic, "Error while consuming from {}: {}", topic, e);

                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => break,
                    _ = tokio::time::sleep(error_backoff) => {}
                }
            }
        }
    }

    info!(topic = %topic, "Consumer loop stopped");
}

/// Receive one message, log it and acknowledge it.
///
/// Returns [`Iteration::Cancelled`] without touching the subscription when
/// shutdown was already requested or arrives while waiting.
pub async fn consume_once<S: MessageSubscription>(
    subscription: &mut S,
    shutdown: &mut ShutdownSignal,
) -> MessageResult<Iteration> {
    if shutdown.is_triggered() {
        return Ok(Iteration::Cancelled);
    }

    let delivery = tokio::select! {
        biased;
        _ = shutdown.triggered() => return Ok(Iteration::Cancelled),
        received = subscription.receive() => received?,
    };

    let message = delivery.text()?;
    info!("Received message from {}: {}", subscription.topic(), message);

    subscription.acknowledge(&delivery).await?;
    Ok(Iteration::Handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shared::messaging::memory::MemoryBroker;
    use shared::messaging::{MessageError, SubscriptionType};
    use shared::observability::capture::LogCapture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::Level;

    use crate::error::ServiceError;
    use crate::supervisor::Supervisor;

    fn topics() -> Vec<String> {
        vec!["Topic1".to_string(), "Topic2".to_string()]
    }

    fn acks_on(broker: &MemoryBroker, topic: &str) -> usize {
        broker
            .acks()
            .iter()
            .filter(|ack| ack.topic == topic)
            .count()
    }

    fn topic1_spec() -> SubscriptionSpec {
        SubscriptionSpec::failover("Topic1", subscription_name("Topic1"), InitialPosition::Latest)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_start_subscribes_every_topic() {
        let broker = MemoryBroker::new();

        let consumer = MultiConsumer::start(&broker, &topics(), Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(consumer.topics(), topics());
        let subscriptions = broker.subscriptions();
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(subscriptions[0].subscription_name, "Topic1-subscription-name");
        assert_eq!(subscriptions[1].subscription_name, "Topic2-subscription-name");
        for subscription in &subscriptions {
            assert_eq!(subscription.subscription_type, SubscriptionType::Failover);
            assert_eq!(subscription.initial_position, InitialPosition::Latest);
        }
    }

    #[tokio::test]
    async fn test_start_fails_when_any_subscription_fails() {
        let broker = MemoryBroker::new();
        broker.fail_subscriptions_to("Topic2");

        let result = MultiConsumer::start(&broker, &topics(), Duration::from_millis(10)).await;

        assert!(matches!(
            result,
            Err(ServiceError::Broker(MessageError::Subscription(_)))
        ));
    }

    #[tokio::test]
    async fn test_consume_once_acknowledges_after_logging() {
        let capture = LogCapture::new();
        let _guard = capture.install();
        let broker = MemoryBroker::new();
        let supervisor = Supervisor::new();
        let mut shutdown = supervisor.signal();
        let mut subscription = broker.subscribe(&topic1_spec()).await.unwrap();

        broker.publish_raw("Topic1", b"hi".to_vec());
        let outcome = consume_once(&mut subscription, &mut shutdown).await;

        assert_eq!(outcome, Ok(Iteration::Handled));
        assert_eq!(acks_on(&broker, "Topic1"), 1);
        assert_eq!(capture.count(Level::INFO, "Received message from Topic1: hi"), 1);
    }

    #[tokio::test]
    async fn test_consume_once_reports_ack_failure() {
        let broker = MemoryBroker::new();
        broker.fail_acks("Topic1", 1);
        let supervisor = Supervisor::new();
        let mut shutdown = supervisor.signal();
        let mut subscription = broker.subscribe(&topic1_spec()).await.unwrap();

        broker.publish_raw("Topic1", b"first".to_vec());
        broker.publish_raw("Topic1", b"second".to_vec());

        let first = consume_once(&mut subscription, &mut shutdown).await;
        let second = consume_once(&mut subscription, &mut shutdown).await;

        assert!(matches!(first, Err(MessageError::Acknowledge(_))));
        assert_eq!(second, Ok(Iteration::Handled));
        assert_eq!(acks_on(&broker, "Topic1"), 1);
    }

    #[tokio::test]
    async fn test_consume_once_returns_when_cancelled() {
        let broker = MemoryBroker::new();
        let supervisor = Supervisor::new();
        let mut shutdown = supervisor.signal();
        let mut subscription = broker.subscribe(&topic1_spec()).await.unwrap();

        let handle = supervisor.handle();
        let waiting = consume_once(&mut subscription, &mut shutdown);
        handle.trigger();

        assert_eq!(waiting.await, Ok(Iteration::Cancelled));
    }

    #[tokio::test]
    async fn test_failing_topic_does_not_stall_the_others() {
        let capture = LogCapture::new();
        let _guard = capture.install();
        let broker = MemoryBroker::new();
        let supervisor = Supervisor::new();

        let consumer = MultiConsumer::start(&broker, &topics(), Duration::from_millis(10))
            .await
            .unwrap();
        let task = tokio::spawn(consumer.run(supervisor.signal()));

        broker.inject_receive_error(
            "Topic1",
            MessageError::Receive("connection reset".to_string()),
        );
        broker.fail_acks("Topic1", 1);
        broker.publish_raw("Topic1", b"lost ack".to_vec());
        broker.publish_raw("Topic2", b"one".to_vec());
        broker.publish_raw("Topic2", b"two".to_vec());

        wait_until(|| acks_on(&broker, "Topic2") == 2).await;

        // Topic1 recovers after both failures
        broker.publish_raw("Topic1", b"recovered".to_vec());
        wait_until(|| acks_on(&broker, "Topic1") == 1).await;

        supervisor.handle().trigger();
        task.await.unwrap().unwrap();

        assert_eq!(capture.count(Level::ERROR, "Error while consuming from Topic1"), 2);
        assert_eq!(capture.count(Level::ERROR, "Error while consuming from Topic2"), 0);
        assert!(capture.contains("Received message from Topic2: two"));
        assert!(capture.contains("Received message from Topic1: recovered"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_loop() {
        let broker = MemoryBroker::new();
        let supervisor = Supervisor::new();

        let consumer = MultiConsumer::start(&broker, &topics(), Duration::from_secs(60))
            .await
            .unwrap();
        let task = tokio::spawn(consumer.run(supervisor.signal()));

        // A pending backoff must not delay shutdown
        broker.inject_receive_error("Topic1", MessageError::Receive("boom".to_string()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        supervisor.handle().trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    struct StuckDelivery;

    impl Delivery for StuckDelivery {
        fn payload(&self) -> &[u8] {
            b"stuck"
        }
    }

    /// Hands out one message, then never finishes acknowledging it
    struct StuckSubscription {
        delivered: bool,
        acknowledging: Arc<AtomicBool>,
        _held: Arc<()>,
    }

    #[async_trait::async_trait]
    impl MessageSubscription for StuckSubscription {
        type Delivery = StuckDelivery;

        fn topic(&self) -> &str {
            "Stuck"
        }

        async fn receive(&mut self) -> MessageResult<StuckDelivery> {
            if self.delivered {
                futures::future::pending::<()>().await;
            }
            self.delivered = true;
            Ok(StuckDelivery)
        }

        async fn acknowledge(&mut self, _delivery: &StuckDelivery) -> MessageResult<()> {
            self.acknowledging.store(true, Ordering::SeqCst);
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_expired_grace_releases_stuck_loops() {
        let held = Arc::new(());
        let acknowledging = Arc::new(AtomicBool::new(false));
        let consumer = MultiConsumer {
            subscriptions: vec![StuckSubscription {
                delivered: false,
                acknowledging: acknowledging.clone(),
                _held: held.clone(),
            }],
            error_backoff: Duration::from_millis(10),
        };

        let mut supervisor = Supervisor::new();
        let signal = supervisor.signal();
        supervisor.spawn("multi-consumer", consumer.run(signal));

        wait_until(|| acknowledging.load(Ordering::SeqCst)).await;
        assert_eq!(Arc::strong_count(&held), 2);

        assert!(!supervisor.shutdown(Duration::from_millis(50)).await);

        wait_until(|| Arc::strong_count(&held) == 1).await;
    }
}
