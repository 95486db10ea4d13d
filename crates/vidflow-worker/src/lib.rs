//! Stage worker.
//!
//! One binary serves every stage; `WORKER_STAGE` picks which. A worker:
//! - consumes its stage queue through [`vidflow_queue::ReliableConsumer`]
//! - downloads the input object, runs the stage's processing capability and
//!   uploads the result under a deterministic key
//! - records an advisory stage state in the status store
//! - reports exactly one outcome per message to the orchestrator

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod notifier;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use handler::StageHandler;
pub use logging::StageLogger;
pub use notifier::OutcomeNotifier;
pub use worker::{output_key, StageWorker};
