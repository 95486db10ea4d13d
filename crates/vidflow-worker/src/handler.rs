//! Queue handler for a stage worker.

use async_trait::async_trait;
use std::sync::Arc;

use vidflow_models::StageMessage;
use vidflow_queue::{Attempt, Delivery, HandlerError, MessageHandler};

use crate::worker::StageWorker;

/// Decodes stage messages and hands them to a [`StageWorker`].
///
/// A body that is not a stage message is a permanent failure: it goes
/// straight to the dead-letter queue.
pub struct StageHandler {
    worker: Arc<StageWorker>,
}

impl StageHandler {
    pub fn new(worker: Arc<StageWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl MessageHandler for StageHandler {
    async fn handle(&self, delivery: &Delivery, attempt: Attempt) -> Result<(), HandlerError> {
        let message: StageMessage = serde_json::from_slice(delivery.body())
            .map_err(|e| HandlerError::permanent(format!("malformed stage message: {}", e)))?;

        self.worker
            .execute(&message, attempt)
            .await
            .map(|_| ())
            .map_err(HandlerError::from)
    }
}
