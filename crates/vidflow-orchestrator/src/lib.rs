//! Pipeline orchestrator.
//!
//! This crate provides:
//! - The transition table deciding what each event does to a video
//! - [`Orchestrator`], which applies it against the status store and the
//!   stage queues
//! - Per-video stage retry counters with a delayed re-dispatch
//! - [`InboundHandler`], the consumer side of the inbound queue

pub mod config;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod orchestrator;
pub mod transitions;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use handler::InboundHandler;
pub use ledger::{FailureCount, MemoryRetryLedger, RedisRetryLedger, RetryLedger};
pub use orchestrator::{Orchestrator, TransitionOutcome};
pub use transitions::{decide, Action, DiscardReason, Transition, Trigger, TRANSITIONS};
