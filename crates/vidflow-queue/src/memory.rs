//! In-process broker with the same queue semantics as [`RedisBroker`].
//!
//! Used by tests and local runs. Delays and idle reclaim run on
//! `tokio::time`, so paused-clock tests can drive them.
//!
//! [`RedisBroker`]: crate::RedisBroker

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::broker::{QueueConsumer, QueuePublisher};
use crate::channel::ChannelSpec;
use crate::envelope::{
    Delivery, Envelope, PublishOutcome, DEATH_QUEUE_HEADER, DEATH_REASON_HEADER,
};
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    envelope: Envelope,
    delivery_count: u32,
}

#[derive(Debug)]
struct Pending {
    message: Stored,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    spec: Option<ChannelSpec>,
    ready: VecDeque<Stored>,
    pending: HashMap<String, Pending>,
    delayed: Vec<(Instant, Envelope)>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.ready.len() + self.pending.len()
    }

    fn dlq_name(&self) -> Option<String> {
        self.spec.as_ref().and_then(ChannelSpec::dlq_name)
    }
}

/// In-memory broker.
#[derive(Debug)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    next_id: AtomicU64,
    claim_idle: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_claim_idle(Duration::from_secs(300))
    }

    /// Broker whose unsettled deliveries become claimable after `claim_idle`.
    pub fn with_claim_idle(claim_idle: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            claim_idle,
        }
    }

    fn next_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn stored(&self, envelope: Envelope) -> Stored {
        Stored {
            id: self.next_id(),
            envelope,
            delivery_count: 0,
        }
    }

    /// Messages waiting on `queue` (ready plus unsettled).
    pub async fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(QueueState::len)
            .unwrap_or(0)
    }

    /// Messages scheduled for later delivery to `queue`.
    pub async fn delayed_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.delayed.len())
            .unwrap_or(0)
    }

    /// Ready (not yet delivered) messages on `queue`, oldest first.
    pub async fn peek(&self, queue: &str) -> Vec<Envelope> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    /// Drain the ready messages on `queue`, oldest first.
    pub async fn drain(&self, queue: &str) -> Vec<Envelope> {
        self.queues
            .lock()
            .await
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|m| m.envelope).collect())
            .unwrap_or_default()
    }

    fn push_dead_letter(
        queues: &mut HashMap<String, QueueState>,
        dlq: String,
        stored: Stored,
    ) {
        queues.entry(dlq).or_default().ready.push_back(stored);
    }

    fn promote_locked(queues: &mut HashMap<String, QueueState>, queue: &str, now: Instant) -> Vec<Envelope> {
        let Some(state) = queues.get_mut(queue) else {
            return Vec::new();
        };
        let (due, later): (Vec<_>, Vec<_>) = state
            .delayed
            .drain(..)
            .partition(|(at, _)| *at <= now);
        state.delayed = later;
        due.into_iter().map(|(_, envelope)| envelope).collect()
    }

    fn next_due(queues: &HashMap<String, QueueState>, queue: &str) -> Option<Instant> {
        queues
            .get(queue)
            .and_then(|q| q.delayed.iter().map(|(at, _)| *at).min())
    }

    fn take_ready(&self, state: &mut QueueState, now: Instant) -> Option<Stored> {
        let claimable = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= self.claim_idle)
            .min_by_key(|(_, p)| p.delivered_at)
            .map(|(tag, _)| tag.clone());
        if let Some(tag) = claimable {
            return state.pending.remove(&tag).map(|p| p.message);
        }
        state.ready.pop_front()
    }
}

#[async_trait]
impl QueuePublisher for MemoryBroker {
    async fn publish(&self, queue: &str, envelope: Envelope) -> QueueResult<PublishOutcome> {
        let stored = self.stored(envelope);
        let outcome = {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue.to_string()).or_default();
            let full = state
                .spec
                .as_ref()
                .map(|spec| spec.max_length > 0 && state.len() as u64 >= spec.max_length)
                .unwrap_or(false);

            if !full {
                state.ready.push_back(stored);
                PublishOutcome::Queued
            } else {
                let dlx_overflow = state
                    .spec
                    .as_ref()
                    .map(|spec| spec.overflow == crate::OverflowPolicy::RejectPublishDlx)
                    .unwrap_or(false);
                match (dlx_overflow, state.dlq_name()) {
                    (true, Some(dlq)) => {
                        let mut stored = stored;
                        stored.envelope = stored
                            .envelope
                            .with_header(DEATH_REASON_HEADER, "maxlen")
                            .with_header(DEATH_QUEUE_HEADER, queue);
                        Self::push_dead_letter(&mut queues, dlq, stored);
                        PublishOutcome::DeadLettered
                    }
                    _ => PublishOutcome::Rejected,
                }
            }
        };
        if outcome.is_queued() {
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        envelope: Envelope,
        delay: Duration,
    ) -> QueueResult<()> {
        let due = Instant::now() + delay;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .delayed
            .push((due, envelope));
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryBroker {
    async fn declare(&self, spec: &ChannelSpec) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(spec.name.clone()).or_default().spec = Some(spec.clone());
        if let Some(dlq) = spec.dlq_name() {
            queues.entry(dlq).or_default();
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        _consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut queues = self.queues.lock().await;
                let now = Instant::now();
                for envelope in Self::promote_locked(&mut queues, queue, now) {
                    let stored = self.stored(envelope);
                    queues.entry(queue.to_string()).or_default().ready.push_back(stored);
                }

                let state = queues.entry(queue.to_string()).or_default();
                if let Some(mut message) = self.take_ready(state, now) {
                    message.delivery_count += 1;
                    let delivery = Delivery {
                        delivery_tag: message.id.clone(),
                        queue: queue.to_string(),
                        envelope: message.envelope.clone(),
                        delivery_count: Some(message.delivery_count),
                    };
                    state.pending.insert(
                        message.id.clone(),
                        Pending {
                            message,
                            delivered_at: now,
                        },
                    );
                    return Ok(Some(delivery));
                }

                let claim_at = state
                    .pending
                    .values()
                    .map(|p| p.delivered_at + self.claim_idle)
                    .min();
                [Some(deadline), Self::next_due(&queues, queue), claim_at]
                    .into_iter()
                    .flatten()
                    .min()
                    .unwrap_or(deadline)
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        queues
            .get_mut(&delivery.queue)
            .and_then(|q| q.pending.remove(&delivery.delivery_tag))
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_tag.clone()))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()> {
        {
            let mut queues = self.queues.lock().await;
            let state = queues
                .get_mut(&delivery.queue)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_tag.clone()))?;
            let pending = state
                .pending
                .remove(&delivery.delivery_tag)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_tag.clone()))?;

            if requeue {
                state.ready.push_front(pending.message);
            } else if let Some(dlq) = state.dlq_name() {
                let mut message = pending.message;
                message.envelope = message
                    .envelope
                    .with_header(DEATH_REASON_HEADER, "rejected")
                    .with_header(DEATH_QUEUE_HEADER, delivery.queue.as_str());
                message.delivery_count = 0;
                Self::push_dead_letter(&mut queues, dlq, message);
            }
        }
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, envelope: Envelope) -> QueueResult<()> {
        {
            let mut queues = self.queues.lock().await;
            let state = queues
                .get_mut(&delivery.queue)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_tag.clone()))?;
            state
                .pending
                .remove(&delivery.delivery_tag)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.delivery_tag.clone()))?;
            let stored = self.stored(envelope);
            state.ready.push_back(stored);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> QueueResult<usize> {
        let moved = {
            let mut queues = self.queues.lock().await;
            let due = Self::promote_locked(&mut queues, queue, Instant::now());
            let count = due.len();
            for envelope in due {
                let stored = self.stored(envelope);
                queues.entry(queue.to_string()).or_default().ready.push_back(stored);
            }
            count
        };
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OverflowPolicy;
    use crate::envelope::RETRY_COUNT_HEADER;

    const BLOCK: Duration = Duration::from_millis(50);

    async fn declared(spec: ChannelSpec) -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.declare(&spec).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let broker = declared(ChannelSpec::new("q").with_max_length(10)).await;
        let outcome = broker.publish("q", Envelope::new("hello")).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Queued);

        let delivery = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"hello");
        assert_eq!(delivery.delivery_count, Some(1));
        assert_eq!(broker.len("q").await, 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.len("q").await, 0);
        assert!(broker.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let broker = declared(ChannelSpec::new("q")).await;
        assert!(broker.receive("q", "c1", BLOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overflow_goes_to_dead_letter_queue() {
        let broker = declared(ChannelSpec::new("q").with_max_length(1)).await;
        broker.publish("q", Envelope::new("1")).await.unwrap();
        let outcome = broker.publish("q", Envelope::new("2")).await.unwrap();

        assert_eq!(outcome, PublishOutcome::DeadLettered);
        assert_eq!(broker.len("q").await, 1);
        let dead = broker.peek("q.dlq").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, b"2");
        assert_eq!(dead[0].header(DEATH_REASON_HEADER), Some("maxlen"));
    }

    #[tokio::test]
    async fn test_overflow_reject_publish() {
        let spec = ChannelSpec::new("q")
            .with_max_length(1)
            .with_overflow(OverflowPolicy::RejectPublish);
        let broker = declared(spec).await;
        broker.publish("q", Envelope::new("1")).await.unwrap();
        let outcome = broker.publish("q", Envelope::new("2")).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Rejected);
        assert_eq!(broker.len("q.dlq").await, 0);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let broker = declared(ChannelSpec::new("q")).await;
        broker
            .publish("q", Envelope::new("x").with_header(RETRY_COUNT_HEADER, "3"))
            .await
            .unwrap();
        let delivery = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        broker.nack(&delivery, false).await.unwrap();

        assert_eq!(broker.len("q").await, 0);
        let dead = broker.peek("q.dlq").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].header(RETRY_COUNT_HEADER), Some("3"));
        assert_eq!(dead[0].header(DEATH_QUEUE_HEADER), Some("q"));
    }

    #[tokio::test]
    async fn test_nack_without_dead_letter_drops() {
        let broker = declared(ChannelSpec::new("q").with_dead_letter(false)).await;
        broker.publish("q", Envelope::new("x")).await.unwrap();
        let delivery = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        broker.nack(&delivery, false).await.unwrap();

        assert_eq!(broker.len("q").await, 0);
        assert_eq!(broker.len("q.dlq").await, 0);
    }

    #[tokio::test]
    async fn test_retry_replaces_delivery_in_full_queue() {
        let broker = declared(ChannelSpec::new("q").with_max_length(1)).await;
        broker.publish("q", Envelope::new("x")).await.unwrap();
        let first = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();

        let replacement = first.envelope.with_retry_count(1);
        broker.retry(&first, replacement).await.unwrap();

        assert_eq!(broker.len("q").await, 1);
        assert_eq!(broker.len("q.dlq").await, 0);
        let second = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        assert_ne!(second.delivery_tag, first.delivery_tag);
        assert_eq!(second.retry_count(), 1);
        assert!(broker.retry(&first, Envelope::new("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let broker = declared(ChannelSpec::new("q")).await;
        broker.publish("q", Envelope::new("x")).await.unwrap();
        let first = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        broker.nack(&first, true).await.unwrap();

        let second = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        assert_eq!(second.delivery_tag, first.delivery_tag);
        assert_eq!(second.delivery_count, Some(2));
        assert_eq!(second.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_publish_becomes_visible_after_delay() {
        let broker = declared(ChannelSpec::new("q")).await;
        broker
            .publish_delayed("q", Envelope::new("later"), Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(broker.promote_due("q").await.unwrap(), 0);
        assert!(broker.receive("q", "c1", Duration::from_secs(299)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(broker.promote_due("q").await.unwrap(), 1);
        let delivery = broker.receive("q", "c1", BLOCK).await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_for_delayed_message() {
        let broker = declared(ChannelSpec::new("q")).await;
        broker
            .publish_delayed("q", Envelope::new("soon"), Duration::from_secs(10))
            .await
            .unwrap();
        let delivery = broker.receive("q", "c1", Duration::from_secs(30)).await.unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_delivery_is_reclaimed() {
        let broker = MemoryBroker::with_claim_idle(Duration::from_secs(60));
        broker.declare(&ChannelSpec::new("q")).await.unwrap();
        broker.publish("q", Envelope::new("x")).await.unwrap();

        let first = broker.receive("q", "crashed", BLOCK).await.unwrap().unwrap();
        assert!(broker.receive("q", "c2", BLOCK).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        let reclaimed = broker.receive("q", "c2", BLOCK).await.unwrap().unwrap();
        assert_eq!(reclaimed.delivery_tag, first.delivery_tag);
        assert_eq!(reclaimed.delivery_count, Some(2));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = std::sync::Arc::new(declared(ChannelSpec::new("q")).await);
        let consumer = broker.clone();
        let handle = tokio::spawn(async move {
            consumer.receive("q", "c1", Duration::from_secs(5)).await
        });
        tokio::task::yield_now().await;
        broker.publish("q", Envelope::new("x")).await.unwrap();

        let delivery = handle.await.unwrap().unwrap();
        assert!(delivery.is_some());
    }
}
