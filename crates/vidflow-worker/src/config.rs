//! Worker configuration.

use std::time::Duration;

use vidflow_media::MediaConfig;
use vidflow_models::{QueueTopology, Stage};
use vidflow_queue::QueueConfig;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stage this process runs
    pub stage: Stage,
    /// Bucket stage inputs are read from
    pub input_bucket: String,
    /// Bucket stage outputs are written to
    pub output_bucket: String,
    /// Broker and queue settings
    pub queue: QueueConfig,
    /// Queue names
    pub topology: QueueTopology,
    /// Processing parameters
    pub media: MediaConfig,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Default settings for `stage`.
    pub fn for_stage(stage: Stage) -> Self {
        Self {
            stage,
            input_bucket: "videos".to_string(),
            output_bucket: "videos".to_string(),
            queue: QueueConfig::default(),
            topology: QueueTopology::default(),
            media: MediaConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    ///
    /// `WORKER_STAGE` is required; everything else has a default.
    pub fn from_env() -> WorkerResult<Self> {
        let stage = std::env::var("WORKER_STAGE")
            .map_err(|_| WorkerError::config_error("WORKER_STAGE is not set"))?
            .parse::<Stage>()
            .map_err(|e| WorkerError::config_error(e.to_string()))?;

        let defaults = Self::for_stage(stage);
        Ok(Self {
            stage,
            input_bucket: std::env::var("INPUT_BUCKET").unwrap_or(defaults.input_bucket),
            output_bucket: std::env::var("OUTPUT_BUCKET").unwrap_or(defaults.output_bucket),
            queue: QueueConfig::from_env(),
            topology: QueueTopology::from_env(),
            media: MediaConfig::from_env(),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.shutdown_timeout.as_secs()),
            ),
        })
    }

    pub fn validate(&self) -> WorkerResult<()> {
        self.queue.validate()?;
        self.media.validate()?;
        if self.input_bucket.trim().is_empty() {
            return Err(WorkerError::config_error("INPUT_BUCKET must not be empty"));
        }
        if self.output_bucket.trim().is_empty() {
            return Err(WorkerError::config_error("OUTPUT_BUCKET must not be empty"));
        }
        Ok(())
    }

    /// Queue this worker consumes.
    pub fn stage_queue(&self) -> &str {
        self.topology.queue_for(self.stage)
    }
}
