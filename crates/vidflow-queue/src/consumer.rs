//! Bounded-retry consumer loop.
//!
//! Every stage worker and the orchestrator consume through
//! [`ReliableConsumer`]. Per delivery:
//!
//! - handler succeeds: ack
//! - retryable failure below the budget: replace the delivery with a copy
//!   carrying `x-retry-count + 1` (exempt from the queue's length bound)
//! - retryable failure at the budget, or permanent failure: nack without
//!   requeue (dead-letter queue when wired, dropped otherwise)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::channel::ChannelSpec;
use crate::envelope::{Delivery, PublishOutcome};
use crate::error::{HandlerError, QueueResult};
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Where a delivery sits in its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Broker-level retries already spent (0 on first delivery)
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Attempt {
    pub fn new(retry_count: u32, max_retries: u32) -> Self {
        Self {
            retry_count,
            max_retries,
        }
    }

    /// Whether a retryable failure now would be dead-lettered.
    pub fn is_final(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Processes one delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery, attempt: Attempt) -> Result<(), HandlerError>;
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    /// Replaced by a copy carrying this retry count
    Republished { retry_count: u32 },
    /// Nacked without requeue
    DeadLettered,
    /// Left for redelivery because the republish failed
    Requeued,
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Acked => "acked",
            Settlement::Republished { .. } => "republished",
            Settlement::DeadLettered => "dead_lettered",
            Settlement::Requeued => "requeued",
        }
    }
}

/// Consumer loop for one queue.
pub struct ReliableConsumer {
    broker: Arc<dyn Broker>,
    spec: ChannelSpec,
    handler: Arc<dyn MessageHandler>,
    max_retries: u32,
    block: Duration,
    consumer_name: String,
    shutdown: watch::Sender<bool>,
}

impl ReliableConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        spec: ChannelSpec,
        handler: Arc<dyn MessageHandler>,
        max_retries: u32,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("{}-{}", spec.name, Uuid::new_v4());
        Self {
            broker,
            spec,
            handler,
            max_retries,
            block: Duration::from_secs(5),
            consumer_name,
            shutdown,
        }
    }

    /// How long each receive blocks before the loop checks for shutdown.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Signal shutdown. The delivery in flight, if any, is finished first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Declare the queue and consume until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> QueueResult<()> {
        self.broker.declare(&self.spec).await?;
        info!(
            "Consumer '{}' listening on {} (max retries {})",
            self.consumer_name, self.spec.name, self.max_retries
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(3);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.broker.promote_due(&self.spec.name).await {
                if failures.record_failure() {
                    warn!("Failed to promote delayed messages on {}: {}", self.spec.name, e);
                }
            }

            // Only the receive is raced against shutdown; a delivery that
            // has been received is always handled and settled
            let received = tokio::select! {
                _ = shutdown_rx.changed() => {
                    continue;
                }
                result = self.broker.receive(&self.spec.name, &self.consumer_name, self.block) => result,
            };

            match received {
                Ok(Some(delivery)) => {
                    failures.record_success();
                    self.process(delivery).await;
                }
                Ok(None) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        error!("Error receiving from {}: {}", self.spec.name, e);
                    }
                    // Back off on error
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("Consumer '{}' stopped", self.consumer_name);
        Ok(())
    }

    /// Run the handler on one delivery and settle it.
    pub async fn process(&self, delivery: Delivery) -> Settlement {
        let attempt = Attempt::new(delivery.retry_count(), self.max_retries);
        debug!(
            queue = %delivery.queue,
            message_id = %delivery.delivery_tag,
            retry_count = attempt.retry_count,
            "Handling delivery"
        );

        let settlement = match self.handler.handle(&delivery, attempt).await {
            Ok(()) => self.ack(&delivery).await,
            Err(HandlerError::Retryable(reason)) if !attempt.is_final() => {
                warn!(
                    queue = %delivery.queue,
                    message_id = %delivery.delivery_tag,
                    "Handler failed (retry {}/{}): {}",
                    attempt.retry_count + 1,
                    attempt.max_retries,
                    reason
                );
                self.republish(&delivery, attempt.retry_count + 1).await
            }
            Err(e) => {
                warn!(
                    queue = %delivery.queue,
                    message_id = %delivery.delivery_tag,
                    retry_count = attempt.retry_count,
                    "Giving up on delivery: {}",
                    e
                );
                self.reject(&delivery).await
            }
        };

        metrics::record_settlement(&delivery.queue, settlement.as_str());
        settlement
    }

    async fn ack(&self, delivery: &Delivery) -> Settlement {
        if let Err(e) = self.broker.ack(delivery).await {
            // Unsettled deliveries are claimed again after the idle timeout
            error!("Failed to ack {}: {}", delivery.delivery_tag, e);
        }
        Settlement::Acked
    }

    async fn reject(&self, delivery: &Delivery) -> Settlement {
        if let Err(e) = self.broker.nack(delivery, false).await {
            error!("Failed to dead-letter {}: {}", delivery.delivery_tag, e);
        }
        Settlement::DeadLettered
    }

    async fn republish(&self, delivery: &Delivery, retry_count: u32) -> Settlement {
        let envelope = delivery.envelope.with_retry_count(retry_count);
        let config = RetryConfig::new(format!("republish to {}", delivery.queue));
        let replaced = retry_async(&config, || self.broker.retry(delivery, envelope.clone()))
            .await
            .into_result();

        match replaced {
            Ok(()) => {
                metrics::record_publish(&delivery.queue, PublishOutcome::Queued);
                Settlement::Republished { retry_count }
            }
            Err(e) => {
                error!("Failed to republish {}: {}", delivery.delivery_tag, e);
                if let Err(e) = self.broker.nack(delivery, true).await {
                    error!("Failed to requeue {}: {}", delivery.delivery_tag, e);
                }
                Settlement::Requeued
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, RETRY_COUNT_HEADER};
    use crate::memory::MemoryBroker;
    use crate::QueueConsumer;
    use crate::QueuePublisher;
    use std::sync::Mutex;

    /// Handler that replays a fixed script of results and records attempts.
    struct ScriptedHandler {
        results: Mutex<Vec<Result<(), HandlerError>>>,
        seen: Mutex<Vec<Attempt>>,
    }

    impl ScriptedHandler {
        fn new(results: Vec<Result<(), HandlerError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<Attempt> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, _delivery: &Delivery, attempt: Attempt) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(attempt);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }

    async fn setup(
        handler: Arc<ScriptedHandler>,
        max_retries: u32,
    ) -> (Arc<MemoryBroker>, ReliableConsumer) {
        let broker = Arc::new(MemoryBroker::new());
        let spec = ChannelSpec::new("work").with_max_length(100);
        broker.declare(&spec).await.unwrap();
        let consumer = ReliableConsumer::new(broker.clone(), spec, handler, max_retries)
            .with_block(Duration::from_millis(20));
        (broker, consumer)
    }

    async fn next(broker: &MemoryBroker) -> Delivery {
        broker
            .receive("work", "test", Duration::from_millis(20))
            .await
            .unwrap()
            .expect("a delivery")
    }

    #[tokio::test]
    async fn test_success_acks() {
        let handler = ScriptedHandler::new(vec![Ok(())]);
        let (broker, consumer) = setup(handler, 3).await;
        broker.publish("work", Envelope::new("m")).await.unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::Acked);
        assert_eq!(broker.len("work").await, 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_republishes_with_incremented_count() {
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("flaky"))]);
        let (broker, consumer) = setup(handler, 3).await;
        broker.publish("work", Envelope::new("m")).await.unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::Republished { retry_count: 1 });

        let queued = broker.peek("work").await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].header(RETRY_COUNT_HEADER), Some("1"));
        assert_eq!(queued[0].body, b"m");
    }

    #[tokio::test]
    async fn test_retry_in_full_queue_is_not_dead_lettered() {
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("flaky"))]);
        let broker = Arc::new(MemoryBroker::new());
        let spec = ChannelSpec::new("work").with_max_length(1);
        broker.declare(&spec).await.unwrap();
        let consumer = ReliableConsumer::new(broker.clone(), spec, handler.clone(), 3);
        broker.publish("work", Envelope::new("m")).await.unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::Republished { retry_count: 1 });
        assert_eq!(broker.len("work").await, 1);
        assert_eq!(broker.len("work.dlq").await, 0);

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::Acked);
        let counts: Vec<u32> = handler.attempts().iter().map(|a| a.retry_count).collect();
        assert_eq!(counts, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_budget_exhausted_dead_letters() {
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("still broken"))]);
        let (broker, consumer) = setup(handler.clone(), 3).await;
        broker
            .publish("work", Envelope::new("m").with_header(RETRY_COUNT_HEADER, "3"))
            .await
            .unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::DeadLettered);
        assert_eq!(broker.len("work").await, 0);
        assert_eq!(broker.peek("work.dlq").await.len(), 1);
        assert!(handler.attempts()[0].is_final());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let handler = ScriptedHandler::new(vec![Err(HandlerError::permanent("bad payload"))]);
        let (broker, consumer) = setup(handler, 3).await;
        broker.publish("work", Envelope::new("garbage")).await.unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::DeadLettered);
        assert_eq!(broker.peek("work.dlq").await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_walk() {
        let failures = (0..4).map(|_| Err(HandlerError::retryable("down"))).collect();
        let handler = ScriptedHandler::new(failures);
        let (broker, consumer) = setup(handler.clone(), 3).await;
        broker.publish("work", Envelope::new("m")).await.unwrap();

        let mut settlements = Vec::new();
        for _ in 0..4 {
            settlements.push(consumer.process(next(&broker).await).await);
        }

        assert_eq!(
            settlements,
            vec![
                Settlement::Republished { retry_count: 1 },
                Settlement::Republished { retry_count: 2 },
                Settlement::Republished { retry_count: 3 },
                Settlement::DeadLettered,
            ]
        );
        let counts: Vec<u32> = handler.attempts().iter().map(|a| a.retry_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
        assert_eq!(broker.peek("work.dlq").await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_dead_letters_first_failure() {
        let handler = ScriptedHandler::new(vec![Err(HandlerError::retryable("down"))]);
        let (broker, consumer) = setup(handler, 0).await;
        broker.publish("work", Envelope::new("m")).await.unwrap();

        let settlement = consumer.process(next(&broker).await).await;
        assert_eq!(settlement, Settlement::DeadLettered);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let handler = ScriptedHandler::new(vec![]);
        let (broker, consumer) = setup(handler.clone(), 3).await;
        broker.publish("work", Envelope::new("m")).await.unwrap();
        let consumer = Arc::new(consumer);

        let runner = consumer.clone();
        let task = tokio::spawn(async move { runner.run().await });

        while handler.attempts().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        consumer.shutdown();

        task.await.unwrap().unwrap();
        assert_eq!(broker.len("work").await, 0);
    }
}
