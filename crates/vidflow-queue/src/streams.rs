//! Reliable queues on Redis Streams.
//!
//! Layout for a queue `Q`:
//! - stream `Q`, consumed through consumer group `Q.group`
//! - hash `Q:args` holding the declaration arguments
//! - stream `Q.dlq`, the dead-letter queue behind exchange `Q.dlx`
//! - sorted set `Q:delayed`, delayed messages scored by due time (epoch ms)
//!
//! Stream entries store the body under `body` and each header under
//! `h:<name>`.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::{QueueConsumer, QueuePublisher};
use crate::channel::{dead_letter_queue, ChannelSpec};
use crate::envelope::{Delivery, Envelope, PublishOutcome};
use crate::error::{QueueError, QueueResult};
use crate::metrics;

const BODY_FIELD: &str = "body";
const HEADER_PREFIX: &str = "h:";
const PROMOTE_BATCH: usize = 100;

/// Length-bounded publish. Returns 1 (queued), 2 (dead-lettered) or 0 (rejected).
const PUBLISH_SCRIPT: &str = r#"
local max = tonumber(redis.call('HGET', KEYS[2], 'x-max-length') or '0')
local fields = {}
for i = 2, #ARGV do
    fields[#fields + 1] = ARGV[i]
end
if max > 0 and redis.call('XLEN', KEYS[1]) >= max then
    local overflow = redis.call('HGET', KEYS[2], 'x-overflow')
    local dlx = redis.call('HGET', KEYS[2], 'x-dead-letter-exchange')
    if overflow == 'reject-publish-dlx' and dlx then
        fields[#fields + 1] = 'h:x-death-reason'
        fields[#fields + 1] = 'maxlen'
        fields[#fields + 1] = 'h:x-death-queue'
        fields[#fields + 1] = ARGV[1]
        redis.call('XADD', KEYS[3], '*', unpack(fields))
        return 2
    end
    return 0
end
redis.call('XADD', KEYS[1], '*', unpack(fields))
return 1
"#;

/// Settle a delivery as rejected: copy to the dead-letter queue when one is
/// wired, then ack and delete. Returns 1 when the message was dead-lettered.
const REJECT_SCRIPT: &str = r#"
local entry = redis.call('XRANGE', KEYS[1], ARGV[2], ARGV[2])
local dlx = redis.call('HGET', KEYS[2], 'x-dead-letter-exchange')
local moved = 0
if dlx and #entry > 0 then
    local fields = entry[1][2]
    fields[#fields + 1] = 'h:x-death-reason'
    fields[#fields + 1] = 'rejected'
    fields[#fields + 1] = 'h:x-death-queue'
    fields[#fields + 1] = ARGV[3]
    fields[#fields + 1] = 'h:x-death-time'
    fields[#fields + 1] = ARGV[4]
    redis.call('XADD', KEYS[3], '*', unpack(fields))
    moved = 1
end
redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
return moved
"#;

/// Replace a pending delivery with its retry. The replacement is only added
/// while the original is still pending, so a repeated call adds nothing.
/// Returns 1 when the replacement was queued.
const RETRY_SCRIPT: &str = r#"
local acked = redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
if acked == 1 then
    local fields = {}
    for i = 3, #ARGV do
        fields[#fields + 1] = ARGV[i]
    end
    redis.call('XADD', KEYS[1], '*', unpack(fields))
end
redis.call('XDEL', KEYS[1], ARGV[2])
return acked
"#;

/// Move due delayed messages onto the stream. Returns how many moved.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local moved = 0
for _, member in ipairs(due) do
    if redis.call('ZREM', KEYS[1], member) == 1 then
        local entry = cjson.decode(member)
        local fields = {'body', entry.body}
        for k, v in pairs(entry.headers) do
            fields[#fields + 1] = 'h:' .. k
            fields[#fields + 1] = v
        end
        redis.call('XADD', KEYS[2], '*', unpack(fields))
        moved = moved + 1
    end
end
return moved
"#;

/// Member of the delayed set. `id` keeps identical messages distinct.
#[derive(Debug, Serialize, Deserialize)]
struct DelayedEntry {
    id: String,
    body: String,
    headers: BTreeMap<String, String>,
}

fn args_key(queue: &str) -> String {
    format!("{}:args", queue)
}

fn delayed_key(queue: &str) -> String {
    format!("{}:delayed", queue)
}

fn group_name(queue: &str) -> String {
    format!("{}.group", queue)
}

/// Flatten an envelope into stream fields.
fn envelope_fields(envelope: &Envelope) -> Vec<(String, Vec<u8>)> {
    let mut fields = Vec::with_capacity(envelope.headers.len() + 1);
    fields.push((BODY_FIELD.to_string(), envelope.body.clone()));
    for (key, value) in &envelope.headers {
        fields.push((format!("{}{}", HEADER_PREFIX, key), value.clone().into_bytes()));
    }
    fields
}

fn value_bytes(value: &redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

/// Rebuild an envelope from a stream entry. `None` when the entry has no body
/// (deleted between XPENDING and XCLAIM).
fn entry_envelope(entry: &redis::streams::StreamId) -> Option<Envelope> {
    let body = entry.map.get(BODY_FIELD).and_then(value_bytes)?;
    let headers = entry
        .map
        .iter()
        .filter_map(|(field, value)| {
            let name = field.strip_prefix(HEADER_PREFIX)?;
            let bytes = value_bytes(value)?;
            Some((name.to_string(), String::from_utf8_lossy(&bytes).into_owned()))
        })
        .collect();
    Some(Envelope { body, headers })
}

/// Broker backed by Redis Streams.
pub struct RedisBroker {
    client: redis::Client,
    claim_idle: Duration,
}

impl RedisBroker {
    /// Create a broker for `url`.
    pub fn new(url: &str, claim_idle: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client, claim_idle })
    }

    /// Create from a validated [`QueueConfig`](crate::QueueConfig).
    pub fn from_config(config: &crate::QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Self::new(&config.broker_url, config.claim_idle)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Verify the broker is reachable.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Get queue length (ready plus unsettled).
    pub async fn len(&self, queue: &str) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(queue).await?;
        Ok(len)
    }

    /// Get dead-letter queue length.
    pub async fn dlq_len(&self, queue: &str) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(dead_letter_queue(queue)).await?;
        Ok(len)
    }

    /// Claim the oldest delivery left unsettled for longer than the idle
    /// timeout, typically by a crashed consumer.
    async fn claim_idle(&self, queue: &str, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;
        let group = group_name(queue);
        let min_idle_ms = self.claim_idle.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(queue)
            .arg(&group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some(candidate) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(queue)
            .arg(&group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&candidate.id)
            .query_async(&mut conn)
            .await?;

        let Some(entry) = claimed.ids.into_iter().next() else {
            // Another consumer won the claim
            return Ok(None);
        };

        match entry_envelope(&entry) {
            Some(envelope) => {
                info!(
                    queue = %queue,
                    message_id = %entry.id,
                    previous_consumer = %candidate.consumer,
                    "Claimed idle delivery"
                );
                Ok(Some(Delivery {
                    delivery_tag: entry.id,
                    queue: queue.to_string(),
                    envelope,
                    delivery_count: Some(candidate.times_delivered as u32 + 1),
                }))
            }
            None => {
                warn!(queue = %queue, message_id = %entry.id, "Dropping pending entry without body");
                redis::cmd("XACK")
                    .arg(queue)
                    .arg(&group)
                    .arg(&entry.id)
                    .query_async::<()>(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl QueuePublisher for RedisBroker {
    async fn publish(&self, queue: &str, envelope: Envelope) -> QueueResult<PublishOutcome> {
        let mut conn = self.connection().await?;

        let script = redis::Script::new(PUBLISH_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(queue)
            .key(args_key(queue))
            .key(dead_letter_queue(queue))
            .arg(queue);
        for (field, value) in envelope_fields(&envelope) {
            invocation.arg(field).arg(value);
        }
        let code: i64 = invocation.invoke_async(&mut conn).await?;

        let outcome = match code {
            1 => PublishOutcome::Queued,
            2 => PublishOutcome::DeadLettered,
            0 => PublishOutcome::Rejected,
            other => {
                return Err(QueueError::publish_failed(format!(
                    "unexpected publish result {}",
                    other
                )))
            }
        };

        metrics::record_publish(queue, outcome);
        match outcome {
            PublishOutcome::Queued => debug!(queue = %queue, "Published message"),
            _ => warn!(queue = %queue, outcome = outcome.as_str(), "Queue full, message not queued"),
        }
        Ok(outcome)
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        envelope: Envelope,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let body = String::from_utf8(envelope.body)
            .map_err(|_| QueueError::Serialization("delayed body must be UTF-8".to_string()))?;
        let member = serde_json::to_string(&DelayedEntry {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            headers: envelope.headers,
        })?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        conn.zadd::<_, _, _, ()>(delayed_key(queue), member, due_ms)
            .await?;

        debug!(queue = %queue, delay_secs = delay.as_secs(), "Scheduled delayed message");
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for RedisBroker {
    async fn declare(&self, spec: &ChannelSpec) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Start at 0 so messages published before the first declare are consumed
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&spec.name)
            .arg(spec.group_name())
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", spec.group_name()),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", spec.group_name());
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        let args: Vec<(String, String)> = spec.arguments().into_iter().collect();
        let mut pipe = redis::pipe();
        pipe.atomic().del(args_key(&spec.name)).ignore();
        if !args.is_empty() {
            pipe.hset_multiple(args_key(&spec.name), &args).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        info!(
            queue = %spec.name,
            max_length = spec.max_length,
            overflow = %spec.overflow,
            dead_letter = spec.dead_letter,
            "Declared queue"
        );
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<Delivery>> {
        if let Some(delivery) = self.claim_idle(queue, consumer).await? {
            return Ok(Some(delivery));
        }

        let config = redis::AsyncConnectionConfig::new()
            .set_response_timeout(block + Duration::from_secs(5));
        let mut conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group_name(queue))
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(queue)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::receive_failed(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                match entry_envelope(&entry) {
                    Some(envelope) => {
                        return Ok(Some(Delivery {
                            delivery_tag: entry.id,
                            queue: queue.to_string(),
                            envelope,
                            delivery_count: Some(1),
                        }))
                    }
                    None => {
                        warn!(queue = %queue, message_id = %entry.id, "Skipping entry without body");
                    }
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&delivery.queue)
            .arg(group_name(&delivery.queue))
            .arg(&delivery.delivery_tag)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&delivery.queue)
            .arg(&delivery.delivery_tag)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Acknowledged message");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()> {
        if requeue {
            // Left pending; claimed again once idle
            debug!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Message left for redelivery");
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let moved: i64 = redis::Script::new(REJECT_SCRIPT)
            .key(&delivery.queue)
            .key(args_key(&delivery.queue))
            .key(dead_letter_queue(&delivery.queue))
            .arg(group_name(&delivery.queue))
            .arg(&delivery.delivery_tag)
            .arg(&delivery.queue)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if moved == 1 {
            warn!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Moved message to DLQ");
        } else {
            warn!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Dropped rejected message");
        }
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, envelope: Envelope) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let script = redis::Script::new(RETRY_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&delivery.queue)
            .arg(group_name(&delivery.queue))
            .arg(&delivery.delivery_tag);
        for (field, value) in envelope_fields(&envelope) {
            invocation.arg(field).arg(value);
        }
        let queued: i64 = invocation.invoke_async(&mut conn).await?;

        if queued == 1 {
            debug!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Replaced message with retry");
        } else {
            debug!(queue = %delivery.queue, message_id = %delivery.delivery_tag, "Message already settled, retry not queued");
        }
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let moved: i64 = redis::Script::new(PROMOTE_SCRIPT)
            .key(delayed_key(queue))
            .key(queue)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!(queue = %queue, count = moved, "Promoted delayed messages");
        }
        Ok(moved.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_envelope_fields_layout() {
        let envelope = Envelope::new("{}").with_header("x-retry-count", "1");
        let fields = envelope_fields(&envelope);
        assert_eq!(fields[0], ("body".to_string(), b"{}".to_vec()));
        assert_eq!(fields[1], ("h:x-retry-count".to_string(), b"1".to_vec()));
    }

    #[test]
    fn test_entry_envelope_reads_headers() {
        let mut map = HashMap::new();
        map.insert("body".to_string(), redis::Value::BulkString(b"payload".to_vec()));
        map.insert("h:x-retry-count".to_string(), redis::Value::BulkString(b"2".to_vec()));
        map.insert("unrelated".to_string(), redis::Value::BulkString(b"x".to_vec()));
        let entry = redis::streams::StreamId {
            id: "1-0".to_string(),
            map,
        };

        let envelope = entry_envelope(&entry).unwrap();
        assert_eq!(envelope.body, b"payload");
        assert_eq!(envelope.retry_count_header(), Some(2));
        assert_eq!(envelope.headers.len(), 1);
    }

    #[test]
    fn test_entry_without_body_is_skipped() {
        let entry = redis::streams::StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        assert!(entry_envelope(&entry).is_none());
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(args_key("trim.queue"), "trim.queue:args");
        assert_eq!(delayed_key("trim.queue"), "trim.queue:delayed");
        assert_eq!(group_name("trim.queue"), "trim.queue.group");
    }
}
