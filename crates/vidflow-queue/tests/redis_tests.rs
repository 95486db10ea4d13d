//! Redis Streams broker integration tests.

use std::time::Duration;

use vidflow_queue::{
    ChannelSpec, Envelope, OverflowPolicy, PublishOutcome, QueueConfig, QueueConsumer,
    QueuePublisher, RedisBroker, RETRY_COUNT_HEADER,
};

const BLOCK: Duration = Duration::from_millis(500);

fn broker() -> RedisBroker {
    dotenvy::dotenv().ok();
    let config = QueueConfig::from_env();
    RedisBroker::new(&config.broker_url, Duration::from_secs(1)).expect("Failed to create broker")
}

fn unique_queue(prefix: &str) -> String {
    format!("test.{}.{}", prefix, uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_receive_ack() {
    let broker = broker();
    let queue = unique_queue("ack");
    broker.declare(&ChannelSpec::new(&queue).with_max_length(10)).await.unwrap();

    let outcome = broker
        .publish(&queue, Envelope::new("hello").with_header("trace", "t-1"))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Queued);

    let delivery = broker.receive(&queue, "c1", BLOCK).await.unwrap().expect("delivery");
    assert_eq!(delivery.body(), b"hello");
    assert_eq!(delivery.envelope.header("trace"), Some("t-1"));
    assert_eq!(delivery.retry_count(), 0);

    broker.ack(&delivery).await.unwrap();
    assert_eq!(broker.len(&queue).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_overflow_dead_letters() {
    let broker = broker();
    let queue = unique_queue("overflow");
    broker.declare(&ChannelSpec::new(&queue).with_max_length(1)).await.unwrap();

    broker.publish(&queue, Envelope::new("1")).await.unwrap();
    let outcome = broker.publish(&queue, Envelope::new("2")).await.unwrap();

    assert_eq!(outcome, PublishOutcome::DeadLettered);
    assert_eq!(broker.len(&queue).await.unwrap(), 1);
    assert_eq!(broker.dlq_len(&queue).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_overflow_rejects_without_dlx_policy() {
    let broker = broker();
    let queue = unique_queue("reject");
    let spec = ChannelSpec::new(&queue)
        .with_max_length(1)
        .with_overflow(OverflowPolicy::RejectPublish);
    broker.declare(&spec).await.unwrap();

    broker.publish(&queue, Envelope::new("1")).await.unwrap();
    let outcome = broker.publish(&queue, Envelope::new("2")).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Rejected);
    assert_eq!(broker.dlq_len(&queue).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_moves_to_dlq_with_headers() {
    let broker = broker();
    let queue = unique_queue("nack");
    broker.declare(&ChannelSpec::new(&queue)).await.unwrap();

    broker
        .publish(&queue, Envelope::new("m").with_header(RETRY_COUNT_HEADER, "3"))
        .await
        .unwrap();
    let delivery = broker.receive(&queue, "c1", BLOCK).await.unwrap().expect("delivery");
    assert_eq!(delivery.retry_count(), 3);

    broker.nack(&delivery, false).await.unwrap();
    assert_eq!(broker.len(&queue).await.unwrap(), 0);
    assert_eq!(broker.dlq_len(&queue).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_replaces_delivery_in_full_queue() {
    let broker = broker();
    let queue = unique_queue("retry");
    broker.declare(&ChannelSpec::new(&queue).with_max_length(1)).await.unwrap();
    broker.publish(&queue, Envelope::new("m")).await.unwrap();

    let first = broker.receive(&queue, "c1", BLOCK).await.unwrap().expect("delivery");
    let replacement = first.envelope.with_retry_count(1);
    broker.retry(&first, replacement.clone()).await.unwrap();
    // Repeating the call does not queue a second copy
    broker.retry(&first, replacement).await.unwrap();

    assert_eq!(broker.len(&queue).await.unwrap(), 1);
    assert_eq!(broker.dlq_len(&queue).await.unwrap(), 0);
    let second = broker.receive(&queue, "c1", BLOCK).await.unwrap().expect("delivery");
    assert_ne!(second.delivery_tag, first.delivery_tag);
    assert_eq!(second.retry_count(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_idle_delivery_is_claimed_by_another_consumer() {
    let broker = broker();
    let queue = unique_queue("claim");
    broker.declare(&ChannelSpec::new(&queue)).await.unwrap();
    broker.publish(&queue, Envelope::new("m")).await.unwrap();

    let first = broker.receive(&queue, "crashed", BLOCK).await.unwrap().expect("delivery");
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let claimed = broker.receive(&queue, "c2", BLOCK).await.unwrap().expect("claimed");
    assert_eq!(claimed.delivery_tag, first.delivery_tag);
    assert_eq!(claimed.delivery_count, Some(2));
    assert_eq!(claimed.retry_count(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_delayed_publish_is_promoted_when_due() {
    let broker = broker();
    let queue = unique_queue("delayed");
    broker.declare(&ChannelSpec::new(&queue)).await.unwrap();

    broker
        .publish_delayed(&queue, Envelope::new("{}"), Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(broker.promote_due(&queue).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(broker.promote_due(&queue).await.unwrap(), 1);
    let delivery = broker.receive(&queue, "c1", BLOCK).await.unwrap().expect("delivery");
    assert_eq!(delivery.body(), b"{}");
}
