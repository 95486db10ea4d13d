//! Queue handler for the orchestrator's inbound queue.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

use vidflow_models::{sanitize_for_log, InboundMessage};
use vidflow_queue::{Attempt, Delivery, HandlerError, MessageHandler};

use crate::orchestrator::Orchestrator;

/// Decodes inbound messages (upload notices and stage outcomes) and hands
/// them to the [`Orchestrator`].
pub struct InboundHandler {
    orchestrator: Arc<Orchestrator>,
}

impl InboundHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageHandler for InboundHandler {
    async fn handle(&self, delivery: &Delivery, attempt: Attempt) -> Result<(), HandlerError> {
        let message = InboundMessage::from_slice(delivery.body()).map_err(|e| {
            HandlerError::permanent(format!("malformed inbound message: {}", e))
        })?;

        let span = tracing::info_span!(
            "inbound",
            video_id = %sanitize_for_log(message.video_id().as_str()),
            retry_count = attempt.retry_count
        );

        let result = async {
            match &message {
                InboundMessage::Upload(notice) => {
                    self.orchestrator
                        .execute(&notice.video_id, notice.filename.as_deref())
                        .await
                }
                InboundMessage::Outcome(event) => self.orchestrator.handle_outcome(event).await,
            }
        }
        .instrument(span)
        .await;

        result.map(|_| ()).map_err(HandlerError::from)
    }
}
