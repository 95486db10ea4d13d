//! Queue declarations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

pub const ARG_MAX_LENGTH: &str = "x-max-length";
pub const ARG_OVERFLOW: &str = "x-overflow";
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const ARG_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// What happens to a publish when the queue is at its maximum length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse the publish
    RejectPublish,
    /// Route the publish to the dead-letter queue instead
    #[default]
    RejectPublishDlx,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::RejectPublish => "reject-publish",
            OverflowPolicy::RejectPublishDlx => "reject-publish-dlx",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reject-publish" => Ok(OverflowPolicy::RejectPublish),
            "reject-publish-dlx" => Ok(OverflowPolicy::RejectPublishDlx),
            other => Err(QueueError::invalid_config(format!(
                "unknown overflow policy: {}",
                other
            ))),
        }
    }
}

/// Declaration of a queue `Q` and its dead-letter wiring.
///
/// With dead-lettering enabled, `Q` is bound to exchange `Q.dlx` with
/// routing key `Q`, which routes into `Q.dlq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    /// Maximum number of messages held; 0 means unbounded
    pub max_length: u64,
    pub overflow: OverflowPolicy,
    pub dead_letter: bool,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_length: 0,
            overflow: OverflowPolicy::default(),
            dead_letter: true,
        }
    }

    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_dead_letter(mut self, dead_letter: bool) -> Self {
        self.dead_letter = dead_letter;
        self
    }

    /// Consumer group every worker of this queue joins.
    pub fn group_name(&self) -> String {
        format!("{}.group", self.name)
    }

    pub fn dlx_name(&self) -> Option<String> {
        self.dead_letter.then(|| dead_letter_exchange(&self.name))
    }

    pub fn dlq_name(&self) -> Option<String> {
        self.dead_letter.then(|| dead_letter_queue(&self.name))
    }

    /// Declaration arguments, as a broker would record them.
    pub fn arguments(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        if self.max_length > 0 {
            args.insert(ARG_MAX_LENGTH.to_string(), self.max_length.to_string());
            args.insert(ARG_OVERFLOW.to_string(), self.overflow.to_string());
        }
        if let Some(dlx) = self.dlx_name() {
            args.insert(ARG_DEAD_LETTER_EXCHANGE.to_string(), dlx);
            args.insert(ARG_DEAD_LETTER_ROUTING_KEY.to_string(), self.name.clone());
        }
        args
    }
}

pub fn dead_letter_exchange(queue: &str) -> String {
    format!("{}.dlx", queue)
}

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}.dlq", queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_names() {
        let spec = ChannelSpec::new("trim.queue");
        assert_eq!(spec.dlx_name().as_deref(), Some("trim.queue.dlx"));
        assert_eq!(spec.dlq_name().as_deref(), Some("trim.queue.dlq"));
        assert_eq!(spec.group_name(), "trim.queue.group");
    }

    #[test]
    fn test_arguments_with_dead_letter() {
        let spec = ChannelSpec::new("edit.queue").with_max_length(1000);
        let args = spec.arguments();
        assert_eq!(args.get(ARG_MAX_LENGTH).map(String::as_str), Some("1000"));
        assert_eq!(args.get(ARG_OVERFLOW).map(String::as_str), Some("reject-publish-dlx"));
        assert_eq!(
            args.get(ARG_DEAD_LETTER_EXCHANGE).map(String::as_str),
            Some("edit.queue.dlx")
        );
        assert_eq!(
            args.get(ARG_DEAD_LETTER_ROUTING_KEY).map(String::as_str),
            Some("edit.queue")
        );
    }

    #[test]
    fn test_arguments_without_dead_letter() {
        let spec = ChannelSpec::new("plain").with_dead_letter(false);
        assert!(spec.arguments().is_empty());
        assert!(spec.dlq_name().is_none());
    }

    #[test]
    fn test_overflow_parse() {
        assert_eq!(
            "reject-publish".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::RejectPublish
        );
        assert!("drop-head".parse::<OverflowPolicy>().is_err());
    }
}
