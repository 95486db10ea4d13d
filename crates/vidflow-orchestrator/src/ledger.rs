//! Per-video, per-stage failure counters.
//!
//! These count stage-level failures reported to the orchestrator. They are
//! unrelated to the broker's `x-retry-count`, which counts redeliveries of
//! one message.
//!
//! A failure is counted against the dispatch number the worker echoed back:
//! the counter only moves from `dispatch` to `dispatch + 1`, so a failure
//! event delivered twice is counted once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use vidflow_models::{Stage, VideoId};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Result of counting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCount {
    /// Failures on record after the call
    pub failures: u32,
    /// Whether this call moved the counter
    pub counted: bool,
}

#[async_trait]
pub trait RetryLedger: Send + Sync {
    /// Count the failure of `stage` reported for dispatch number `dispatch`.
    ///
    /// The counter moves to `dispatch + 1` only when it stands at
    /// `dispatch`; otherwise it is left alone and returned as is.
    async fn record_failure(
        &self,
        video_id: &VideoId,
        stage: Stage,
        dispatch: u32,
    ) -> OrchestratorResult<FailureCount>;

    /// Undo a count of `failures` that could not be acted on, if the counter
    /// still stands there.
    async fn release(&self, video_id: &VideoId, stage: Stage, failures: u32)
        -> OrchestratorResult<()>;

    /// Forget the failures of `stage` for `video_id`.
    async fn reset(&self, video_id: &VideoId, stage: Stage) -> OrchestratorResult<()>;
}

/// Returns `{failures, counted}`.
const RECORD_SCRIPT: &str = r#"
local stored = tonumber(redis.call('GET', KEYS[1]) or '0')
if stored == tonumber(ARGV[1]) then
    stored = redis.call('INCR', KEYS[1])
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return {stored, 1}
end
return {stored, 0}
"#;

const RELEASE_SCRIPT: &str = r#"
local failures = tonumber(ARGV[1])
if tonumber(redis.call('GET', KEYS[1]) or '0') ~= failures then
    return 0
end
if failures <= 1 then
    redis.call('DEL', KEYS[1])
else
    redis.call('DECR', KEYS[1])
end
return 1
"#;

/// Counters as Redis integers at `{prefix}:{video_id}:{stage}`.
///
/// Each increment refreshes the key's TTL, so counters of abandoned videos
/// expire on their own.
pub struct RedisRetryLedger {
    client: redis::Client,
    prefix: String,
    ttl: Duration,
}

impl RedisRetryLedger {
    pub fn new(url: &str, prefix: impl Into<String>, ttl: Duration) -> OrchestratorResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            prefix: prefix.into(),
            ttl,
        })
    }

    fn key(&self, video_id: &VideoId, stage: Stage) -> String {
        format!("{}:{}:{}", self.prefix, video_id, stage)
    }

    async fn connection(&self) -> OrchestratorResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| OrchestratorError::Ledger(e.to_string()))
    }
}

#[async_trait]
impl RetryLedger for RedisRetryLedger {
    async fn record_failure(
        &self,
        video_id: &VideoId,
        stage: Stage,
        dispatch: u32,
    ) -> OrchestratorResult<FailureCount> {
        let mut conn = self.connection().await?;
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        let (failures, counted): (u32, u32) = redis::Script::new(RECORD_SCRIPT)
            .key(self.key(video_id, stage))
            .arg(dispatch)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        Ok(FailureCount {
            failures,
            counted: counted == 1,
        })
    }

    async fn release(
        &self,
        video_id: &VideoId,
        stage: Stage,
        failures: u32,
    ) -> OrchestratorResult<()> {
        let mut conn = self.connection().await?;
        redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(video_id, stage))
            .arg(failures)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn reset(&self, video_id: &VideoId, stage: Stage) -> OrchestratorResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(self.key(video_id, stage))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Counters held in memory.
#[derive(Debug, Default)]
pub struct MemoryRetryLedger {
    counts: Mutex<HashMap<(VideoId, Stage), u32>>,
}

impl MemoryRetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, video_id: &VideoId, stage: Stage) -> u32 {
        self.counts
            .lock()
            .await
            .get(&(video_id.clone(), stage))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RetryLedger for MemoryRetryLedger {
    async fn record_failure(
        &self,
        video_id: &VideoId,
        stage: Stage,
        dispatch: u32,
    ) -> OrchestratorResult<FailureCount> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry((video_id.clone(), stage)).or_insert(0);
        let counted = *count == dispatch;
        if counted {
            *count += 1;
        }
        Ok(FailureCount {
            failures: *count,
            counted,
        })
    }

    async fn release(
        &self,
        video_id: &VideoId,
        stage: Stage,
        failures: u32,
    ) -> OrchestratorResult<()> {
        let mut counts = self.counts.lock().await;
        let key = (video_id.clone(), stage);
        if counts.get(&key) == Some(&failures) {
            if failures <= 1 {
                counts.remove(&key);
            } else {
                counts.insert(key, failures - 1);
            }
        }
        Ok(())
    }

    async fn reset(&self, video_id: &VideoId, stage: Stage) -> OrchestratorResult<()> {
        self.counts.lock().await.remove(&(video_id.clone(), stage));
        Ok(())
    }
}
