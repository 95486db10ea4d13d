//! Reliable queue channels on Redis Streams.
//!
//! This crate provides:
//! - Bounded queues with an overflow policy and optional dead-lettering
//! - Publishing (immediate and delayed) behind [`QueuePublisher`]
//! - Consuming with ack / nack behind [`QueueConsumer`]
//! - [`ReliableConsumer`], the bounded-retry loop every worker runs
//! - An in-memory broker with the same semantics for tests

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod streams;

pub use broker::{Broker, QueueConsumer, QueuePublisher};
pub use channel::{ChannelSpec, OverflowPolicy};
pub use config::QueueConfig;
pub use consumer::{Attempt, MessageHandler, ReliableConsumer, Settlement};
pub use envelope::{Delivery, Envelope, PublishOutcome, RETRY_COUNT_HEADER};
pub use error::{HandlerError, QueueError, QueueResult};
pub use memory::MemoryBroker;
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult};
pub use streams::RedisBroker;
