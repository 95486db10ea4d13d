//! Queue names used by the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stage::Stage;

/// Default name of the orchestrator's inbound queue.
pub const DEFAULT_ORCHESTRATOR_QUEUE: &str = "orchestrator.inbound";

/// Which queue feeds each stage, plus the orchestrator's inbound queue.
///
/// Workers and the orchestrator must load the same topology, otherwise
/// messages land on queues nobody consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTopology {
    stages: BTreeMap<String, String>,
    orchestrator_inbound: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            stages: Stage::ALL
                .iter()
                .map(|stage| (stage.as_str().to_string(), stage.default_queue().to_string()))
                .collect(),
            orchestrator_inbound: DEFAULT_ORCHESTRATOR_QUEUE.to_string(),
        }
    }
}

impl QueueTopology {
    /// Load from environment variables, falling back to the default names.
    ///
    /// `TRIM_QUEUE`, `EDIT_QUEUE`, `WATERMARK_QUEUE`, `AUDIO_REMOVAL_QUEUE`,
    /// `INTRO_OUTRO_QUEUE` and `ORCHESTRATOR_QUEUE`.
    pub fn from_env() -> Self {
        let mut topology = Self::default();
        for stage in Stage::ALL {
            if let Some(name) = non_empty_env(env_key(stage)) {
                topology.set_queue(stage, name);
            }
        }
        if let Some(name) = non_empty_env("ORCHESTRATOR_QUEUE") {
            topology.orchestrator_inbound = name;
        }
        topology
    }

    /// Queue consumed by the given stage's workers.
    pub fn queue_for(&self, stage: Stage) -> &str {
        self.stages
            .get(stage.as_str())
            .map(String::as_str)
            .unwrap_or_else(|| stage.default_queue())
    }

    /// Queue the orchestrator consumes outcome events and upload notices from.
    pub fn orchestrator_inbound(&self) -> &str {
        &self.orchestrator_inbound
    }

    pub fn with_queue(mut self, stage: Stage, name: impl Into<String>) -> Self {
        self.set_queue(stage, name);
        self
    }

    pub fn with_orchestrator_inbound(mut self, name: impl Into<String>) -> Self {
        self.orchestrator_inbound = name.into();
        self
    }

    fn set_queue(&mut self, stage: Stage, name: impl Into<String>) {
        self.stages.insert(stage.as_str().to_string(), name.into());
    }

    /// Every queue in the topology, stage queues first.
    pub fn all_queues(&self) -> Vec<&str> {
        let mut queues: Vec<&str> = Stage::ALL.iter().map(|s| self.queue_for(*s)).collect();
        queues.push(self.orchestrator_inbound());
        queues
    }
}

fn env_key(stage: Stage) -> &'static str {
    match stage {
        Stage::Trim => "TRIM_QUEUE",
        Stage::Edit => "EDIT_QUEUE",
        Stage::Watermark => "WATERMARK_QUEUE",
        Stage::AudioRemoval => "AUDIO_REMOVAL_QUEUE",
        Stage::IntroOutro => "INTRO_OUTRO_QUEUE",
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let topology = QueueTopology::default();
        assert_eq!(topology.queue_for(Stage::Trim), "trim.queue");
        assert_eq!(topology.queue_for(Stage::IntroOutro), "intro-outro.queue");
        assert_eq!(topology.orchestrator_inbound(), "orchestrator.inbound");
        assert_eq!(topology.all_queues().len(), 6);
    }

    #[test]
    fn test_overrides() {
        let topology = QueueTopology::default()
            .with_queue(Stage::Watermark, "wm")
            .with_orchestrator_inbound("orch");
        assert_eq!(topology.queue_for(Stage::Watermark), "wm");
        assert_eq!(topology.queue_for(Stage::Edit), "edit.queue");
        assert_eq!(topology.orchestrator_inbound(), "orch");
    }
}
