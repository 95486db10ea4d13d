//! Orchestrator configuration.

use std::time::Duration;

use vidflow_models::QueueTopology;
use vidflow_queue::QueueConfig;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Broker and queue settings
    pub queue: QueueConfig,
    /// Queue names
    pub topology: QueueTopology,
    /// Failed attempts of one stage before the video is marked failed.
    /// The failure that reaches this count is final.
    pub stage_max_retries: u32,
    /// Minutes to wait before re-dispatching a failed stage
    pub retry_delay_minutes: u64,
    /// Key prefix of the per-video retry counters
    pub ledger_prefix: String,
    /// How long an idle retry counter is kept
    pub ledger_ttl: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            topology: QueueTopology::default(),
            stage_max_retries: 3,
            retry_delay_minutes: 5,
            ledger_prefix: "retries".to_string(),
            ledger_ttl: Duration::from_secs(7 * 24 * 3600), // 7 days
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue: QueueConfig::from_env(),
            topology: QueueTopology::from_env(),
            stage_max_retries: std::env::var("STAGE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stage_max_retries),
            retry_delay_minutes: std::env::var("RETRY_DELAY_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_delay_minutes),
            ledger_prefix: std::env::var("RETRY_LEDGER_PREFIX").unwrap_or(defaults.ledger_prefix),
            ledger_ttl: Duration::from_secs(
                std::env::var("RETRY_LEDGER_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.ledger_ttl.as_secs()),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("ORCHESTRATOR_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.shutdown_timeout.as_secs()),
            ),
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        self.queue.validate()?;
        if self.ledger_ttl.is_zero() {
            return Err(OrchestratorError::config_error(
                "RETRY_LEDGER_TTL_SECS must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_minutes.saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_delay(), Duration::from_secs(300));
        assert_eq!(config.topology.orchestrator_inbound(), "orchestrator.inbound");
    }

    #[test]
    fn test_rejects_zero_ledger_ttl() {
        let config = OrchestratorConfig {
            ledger_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OrchestratorError::ConfigError(_))));
    }
}
