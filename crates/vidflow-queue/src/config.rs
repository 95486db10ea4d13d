//! Broker and queue configuration.

use std::time::Duration;

use crate::channel::{ChannelSpec, OverflowPolicy};
use crate::error::{QueueError, QueueResult};

/// Settings shared by every queue a process declares or consumes.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker URL (`redis://` or `rediss://`)
    pub broker_url: String,
    /// Maximum queue length
    pub max_length: u64,
    /// Overflow policy applied at `max_length`
    pub overflow: OverflowPolicy,
    /// Broker-level retries before a message is dead-lettered
    pub max_retries: u32,
    /// Whether queues get a dead-letter exchange and queue
    pub dead_letter: bool,
    /// Idle time after which another consumer may claim a pending delivery
    pub claim_idle: Duration,
    /// How long one receive call blocks
    pub block: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url: "redis://localhost:6379".to_string(),
            max_length: 1000,
            overflow: OverflowPolicy::RejectPublishDlx,
            max_retries: 3,
            dead_letter: true,
            claim_idle: Duration::from_secs(300), // 5 minutes
            block: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_url: std::env::var("BROKER_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or(defaults.broker_url),
            max_length: std::env::var("QUEUE_MAX_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_length),
            overflow: std::env::var("QUEUE_OVERFLOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.overflow),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            dead_letter: std::env::var("QUEUE_DEAD_LETTER")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.dead_letter),
            claim_idle: Duration::from_secs(
                std::env::var("QUEUE_CLAIM_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.claim_idle.as_secs()),
            ),
            block: Duration::from_millis(
                std::env::var("QUEUE_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.block.as_millis() as u64),
            ),
        }
    }

    /// Reject settings the broker cannot honour.
    pub fn validate(&self) -> QueueResult<()> {
        if !(self.broker_url.starts_with("redis://") || self.broker_url.starts_with("rediss://")) {
            return Err(QueueError::invalid_config(
                "BROKER_URL must start with redis:// or rediss://",
            ));
        }
        if self.max_length == 0 {
            return Err(QueueError::invalid_config(
                "QUEUE_MAX_LENGTH must be greater than zero",
            ));
        }
        if self.block.is_zero() {
            return Err(QueueError::invalid_config("QUEUE_BLOCK_MS must be greater than zero"));
        }
        Ok(())
    }

    /// Declaration for a queue under these settings.
    pub fn channel(&self, name: impl Into<String>) -> ChannelSpec {
        ChannelSpec::new(name)
            .with_max_length(self.max_length)
            .with_overflow(self.overflow)
            .with_dead_letter(self.dead_letter)
    }
}
