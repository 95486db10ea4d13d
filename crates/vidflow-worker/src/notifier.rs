//! Outcome reporting to the orchestrator.

use std::sync::Arc;
use tracing::{debug, warn};

use vidflow_models::{sanitize_for_log, StageOutcomeEvent};
use vidflow_queue::{retry_async, Envelope, PublishOutcome, QueuePublisher, RetryConfig};

use crate::error::{WorkerError, WorkerResult};

/// Publishes stage outcome events to the orchestrator's inbound queue.
#[derive(Clone)]
pub struct OutcomeNotifier {
    publisher: Arc<dyn QueuePublisher>,
    queue: String,
}

impl OutcomeNotifier {
    pub fn new(publisher: Arc<dyn QueuePublisher>, queue: impl Into<String>) -> Self {
        Self {
            publisher,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish `event`, retrying transient broker failures.
    ///
    /// A refused publish is an error so the delivery is retried. An event
    /// diverted to the dead-letter queue by the length bound is not: it
    /// has left the worker's hands.
    pub async fn notify(&self, event: &StageOutcomeEvent) -> WorkerResult<PublishOutcome> {
        let envelope = Envelope::json(event)
            .map_err(|e| WorkerError::NotifyFailed(format!("failed to encode outcome: {}", e)))?;

        let config = RetryConfig::new(format!("publish outcome to {}", self.queue));
        let outcome = retry_async(&config, || {
            self.publisher.publish(&self.queue, envelope.clone())
        })
        .await
        .into_result()
        .map_err(|e| WorkerError::NotifyFailed(e.to_string()))?;

        match outcome {
            PublishOutcome::Queued => {
                debug!(
                    video_id = %sanitize_for_log(event.video_id.as_str()),
                    status = %event.status,
                    "Outcome published to {}",
                    self.queue
                );
            }
            PublishOutcome::DeadLettered => {
                warn!(
                    video_id = %sanitize_for_log(event.video_id.as_str()),
                    "Queue {} is full, outcome was dead-lettered",
                    self.queue
                );
            }
            PublishOutcome::Rejected => {
                return Err(WorkerError::NotifyFailed(format!(
                    "queue {} refused the outcome",
                    self.queue
                )));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidflow_models::{InboundMessage, Stage};
    use vidflow_queue::{ChannelSpec, MemoryBroker, OverflowPolicy, QueueConsumer};

    #[tokio::test]
    async fn test_notify_publishes_json_event() {
        let broker = Arc::new(MemoryBroker::new());
        let notifier = OutcomeNotifier::new(broker.clone(), "orchestrator.inbound");
        let event = StageOutcomeEvent::completed("v-1", "raw/v-1.mp4", Stage::Trim, "trimmed/v-1.mp4");

        let outcome = notifier.notify(&event).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Queued);

        let queued = broker.peek("orchestrator.inbound").await;
        assert_eq!(queued.len(), 1);
        match InboundMessage::from_slice(&queued[0].body).unwrap() {
            InboundMessage::Outcome(parsed) => assert_eq!(parsed, event),
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_publish_is_an_error() {
        let broker = Arc::new(MemoryBroker::new());
        let spec = ChannelSpec::new("orchestrator.inbound")
            .with_max_length(1)
            .with_overflow(OverflowPolicy::RejectPublish);
        broker.declare(&spec).await.unwrap();
        let notifier = OutcomeNotifier::new(broker.clone(), "orchestrator.inbound");
        let event = StageOutcomeEvent::failed("v-1", "raw/v-1.mp4", Stage::Trim, "boom");

        notifier.notify(&event).await.unwrap();
        let err = notifier.notify(&event).await.unwrap_err();
        assert!(matches!(err, WorkerError::NotifyFailed(_)));
        assert!(err.is_retryable());
    }
}
