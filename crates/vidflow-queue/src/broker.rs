//! Broker seams used by workers and the orchestrator.

use async_trait::async_trait;
use std::time::Duration;

use crate::channel::ChannelSpec;
use crate::envelope::{Delivery, Envelope, PublishOutcome};
use crate::error::QueueResult;

/// Publishing side of a queue.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish to `queue`, honouring its declared length bound.
    async fn publish(&self, queue: &str, envelope: Envelope) -> QueueResult<PublishOutcome>;

    /// Publish to `queue` once `delay` has elapsed.
    ///
    /// The message becomes visible to consumers when it is promoted; see
    /// [`QueueConsumer::promote_due`].
    async fn publish_delayed(
        &self,
        queue: &str,
        envelope: Envelope,
        delay: Duration,
    ) -> QueueResult<()>;
}

/// Consuming side of a queue.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Declare a queue with its bound and dead-letter wiring. Idempotent.
    async fn declare(&self, spec: &ChannelSpec) -> QueueResult<()>;

    /// Wait up to `block` for the next delivery.
    async fn receive(
        &self,
        queue: &str,
        consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>>;

    /// Settle a delivery as done.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Settle a delivery as failed.
    ///
    /// With `requeue` the message is delivered again later. Without it the
    /// message is dead-lettered when the queue has a dead-letter queue and
    /// dropped otherwise.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()>;

    /// Settle a delivery by queueing `envelope` in its place on the same
    /// queue, in one step.
    ///
    /// The replacement is not subject to the length bound: it takes the slot
    /// the original already held, so a full queue never turns a retry into a
    /// dead-letter.
    async fn retry(&self, delivery: &Delivery, envelope: Envelope) -> QueueResult<()>;

    /// Move delayed messages whose time has come onto `queue`.
    /// Returns how many were moved.
    async fn promote_due(&self, queue: &str) -> QueueResult<usize>;
}

/// A broker that can both publish and consume.
pub trait Broker: QueuePublisher + QueueConsumer {}

impl<T: QueuePublisher + QueueConsumer> Broker for T {}
