//! Redis-backed status store.
//!
//! Each video is a hash at `{prefix}:{video_id}`; timestamps are RFC 3339.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::debug;

use vidflow_models::{Stage, StageState, Video, VideoId, VideoStatus};

use crate::error::{StatusError, StatusResult};
use crate::{ensure_forward, StatusStore};

/// Returns -1 (missing), 0 (status moved on) or 1 (swapped).
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'updated_at', ARGV[3])
if ARGV[4] ~= '' then
    redis.call('HSET', KEYS[1], 'processed_object', ARGV[4], 'processed_at', ARGV[3])
end
return 1
"#;

/// Returns 0 when the record does not exist.
const STAGE_STATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'last_stage', ARGV[1], 'stage_state', ARGV[2], 'updated_at', ARGV[3])
return 1
"#;

/// Create-only insert. Returns 0 when the record already exists.
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Status store on Redis hashes.
pub struct RedisStatusStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStatusStore {
    pub fn new(url: &str, key_prefix: impl Into<String>) -> StatusResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    /// Create from `BROKER_URL` (or `REDIS_URL`) and `STATUS_KEY_PREFIX`.
    pub fn from_env() -> StatusResult<Self> {
        let url = std::env::var("BROKER_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = std::env::var("STATUS_KEY_PREFIX").unwrap_or_else(|_| "video".to_string());
        Self::new(&url, prefix)
    }

    fn key(&self, id: &VideoId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    async fn connection(&self) -> StatusResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StatusError::ConnectionFailed(e.to_string()))
    }

    async fn swap(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        next: VideoStatus,
        processed_object: &str,
    ) -> StatusResult<bool> {
        ensure_forward(expected, next)?;
        let mut conn = self.connection().await?;

        let result: i64 = redis::Script::new(CAS_SCRIPT)
            .key(self.key(id))
            .arg(expected.as_str())
            .arg(next.as_str())
            .arg(Utc::now().to_rfc3339())
            .arg(processed_object)
            .invoke_async(&mut conn)
            .await?;

        match result {
            -1 => Err(StatusError::not_found(id.as_str())),
            0 => {
                debug!(video_id = %id, expected = %expected, "Status moved on, swap skipped");
                Ok(false)
            }
            _ => {
                debug!(video_id = %id, from = %expected, to = %next, "Status updated");
                Ok(true)
            }
        }
    }
}

fn video_fields(video: &Video) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", video.id.to_string()),
        ("source_object", video.source_object.clone()),
        ("status", video.status.as_str().to_string()),
        ("created_at", video.created_at.to_rfc3339()),
        ("updated_at", video.updated_at.to_rfc3339()),
    ];
    if let Some(object) = &video.processed_object {
        fields.push(("processed_object", object.clone()));
    }
    if let Some(stage) = video.last_stage {
        fields.push(("last_stage", stage.as_str().to_string()));
    }
    if let Some(state) = video.stage_state {
        fields.push(("stage_state", state.as_str().to_string()));
    }
    if let Some(at) = video.processed_at {
        fields.push(("processed_at", at.to_rfc3339()));
    }
    fields
}

fn parse_time(id: &str, field: &str, value: &str) -> StatusResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StatusError::corrupt(id, format!("{}: {}", field, e)))
}

fn video_from_hash(id: &VideoId, mut hash: HashMap<String, String>) -> StatusResult<Video> {
    let raw_id = id.as_str();
    let mut required = |field: &str| {
        hash.remove(field)
            .ok_or_else(|| StatusError::corrupt(raw_id, format!("missing {}", field)))
    };

    let status = required("status")?
        .parse::<VideoStatus>()
        .map_err(|e| StatusError::corrupt(raw_id, e.to_string()))?;
    let source_object = required("source_object")?;
    let created_at = parse_time(raw_id, "created_at", &required("created_at")?)?;
    let updated_at = parse_time(raw_id, "updated_at", &required("updated_at")?)?;

    let last_stage = hash
        .remove("last_stage")
        .map(|s| s.parse::<Stage>())
        .transpose()
        .map_err(|e| StatusError::corrupt(raw_id, e.to_string()))?;
    let stage_state = hash
        .remove("stage_state")
        .map(|s| s.parse::<StageState>())
        .transpose()
        .map_err(|e| StatusError::corrupt(raw_id, e.to_string()))?;
    let processed_at = hash
        .remove("processed_at")
        .map(|s| parse_time(raw_id, "processed_at", &s))
        .transpose()?;

    Ok(Video {
        id: id.clone(),
        source_object,
        status,
        processed_object: hash.remove("processed_object"),
        last_stage,
        stage_state,
        created_at,
        updated_at,
        processed_at,
    })
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn find(&self, id: &VideoId) -> StatusResult<Option<Video>> {
        let mut conn = self.connection().await?;
        let hash: HashMap<String, String> = conn.hgetall(self.key(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        video_from_hash(id, hash).map(Some)
    }

    async fn insert(&self, video: &Video) -> StatusResult<bool> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(INSERT_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(self.key(&video.id));
        for (field, value) in video_fields(video) {
            invocation.arg(field).arg(value);
        }
        let created: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(created == 1)
    }

    async fn compare_and_set_status(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        next: VideoStatus,
    ) -> StatusResult<bool> {
        self.swap(id, expected, next, "").await
    }

    async fn complete(
        &self,
        id: &VideoId,
        expected: VideoStatus,
        processed_object: &str,
    ) -> StatusResult<bool> {
        self.swap(id, expected, VideoStatus::Processed, processed_object)
            .await
    }

    async fn update_stage_state(
        &self,
        id: &VideoId,
        stage: Stage,
        state: StageState,
    ) -> StatusResult<()> {
        let mut conn = self.connection().await?;
        let updated: i64 = redis::Script::new(STAGE_STATE_SCRIPT)
            .key(self.key(id))
            .arg(stage.as_str())
            .arg(state.as_str())
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if updated == 0 {
            return Err(StatusError::not_found(id.as_str()));
        }
        Ok(())
    }
}
