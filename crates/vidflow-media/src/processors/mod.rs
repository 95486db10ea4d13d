//! One processing capability per pipeline stage.

mod audio;
mod intro_outro;
mod resolution;
mod trim;
mod watermark;

pub use audio::AudioRemover;
pub use intro_outro::IntroOutroInjector;
pub use resolution::ResolutionAdjuster;
pub use trim::Trimmer;
pub use watermark::WatermarkOverlay;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use vidflow_models::Stage;

use crate::config::MediaConfig;
use crate::error::MediaResult;

/// Transformation applied by a stage worker.
///
/// Reads `input` and writes `output`, both local files. Implementations
/// must be safe to run again on the same input: a redelivered message
/// repeats the call and overwrites `output`.
#[async_trait]
pub trait ProcessingCapability: Send + Sync {
    /// The stage this capability implements.
    fn stage(&self) -> Stage;

    async fn process(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// Build the capability for `stage` from media settings.
pub fn processor_for(stage: Stage, config: &MediaConfig) -> Arc<dyn ProcessingCapability> {
    match stage {
        Stage::Trim => Arc::new(Trimmer::from_config(config)),
        Stage::Edit => Arc::new(ResolutionAdjuster::from_config(config)),
        Stage::Watermark => Arc::new(WatermarkOverlay::from_config(config)),
        Stage::AudioRemoval => Arc::new(AudioRemover::from_config(config)),
        Stage::IntroOutro => Arc::new(IntroOutroInjector::from_config(config)),
    }
}
