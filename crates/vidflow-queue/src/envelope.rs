//! Message envelopes and deliveries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the number of times a message has been republished
/// after a handler failure.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Headers added when a message is dead-lettered.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";
pub const DEATH_QUEUE_HEADER: &str = "x-death-queue";
pub const DEATH_TIME_HEADER: &str = "x-death-time";

/// A message body plus string headers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub body: Vec<u8>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Serialize a value as the JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Retry count recorded in the header, if present and numeric.
    pub fn retry_count_header(&self) -> Option<u32> {
        self.header(RETRY_COUNT_HEADER)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Copy of this envelope carrying the given retry count.
    pub fn with_retry_count(&self, retry_count: u32) -> Self {
        self.clone()
            .with_header(RETRY_COUNT_HEADER, retry_count.to_string())
    }
}

/// Result of a publish against a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The message is on the queue
    Queued,
    /// The queue was full; the message went to its dead-letter queue
    DeadLettered,
    /// The queue was full and the message was refused
    Rejected,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Queued => "queued",
            PublishOutcome::DeadLettered => "dead_lettered",
            PublishOutcome::Rejected => "rejected",
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, PublishOutcome::Queued)
    }
}

/// A message handed to a consumer, pending until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker identifier used to settle the delivery
    pub delivery_tag: String,
    pub queue: String,
    pub envelope: Envelope,
    /// How many times the broker has delivered this message, when known
    pub delivery_count: Option<u32>,
}

impl Delivery {
    pub fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    /// Retry count for this delivery.
    ///
    /// The `x-retry-count` header wins; without it the broker's delivery
    /// count is used (first delivery is retry 0).
    pub fn retry_count(&self) -> u32 {
        self.envelope
            .retry_count_header()
            .or_else(|| self.delivery_count.map(|n| n.saturating_sub(1)))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(envelope: Envelope, delivery_count: Option<u32>) -> Delivery {
        Delivery {
            delivery_tag: "1-0".to_string(),
            queue: "q".to_string(),
            envelope,
            delivery_count,
        }
    }

    #[test]
    fn test_retry_count_from_header() {
        let d = delivery(Envelope::new("x").with_header(RETRY_COUNT_HEADER, "2"), Some(7));
        assert_eq!(d.retry_count(), 2);
    }

    #[test]
    fn test_retry_count_falls_back_to_delivery_count() {
        assert_eq!(delivery(Envelope::new("x"), Some(3)).retry_count(), 2);
        assert_eq!(delivery(Envelope::new("x"), Some(1)).retry_count(), 0);
        assert_eq!(delivery(Envelope::new("x"), None).retry_count(), 0);
    }

    #[test]
    fn test_garbage_header_falls_back() {
        let d = delivery(Envelope::new("x").with_header(RETRY_COUNT_HEADER, "many"), Some(2));
        assert_eq!(d.retry_count(), 1);
    }

    #[test]
    fn test_with_retry_count_keeps_body_and_headers() {
        let original = Envelope::new("payload").with_header("trace", "abc");
        let bumped = original.with_retry_count(1);
        assert_eq!(bumped.body, original.body);
        assert_eq!(bumped.header("trace"), Some("abc"));
        assert_eq!(bumped.retry_count_header(), Some(1));
    }
}
