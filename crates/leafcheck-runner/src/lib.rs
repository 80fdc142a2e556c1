//! # Leafcheck Runner
//!
//! - `runner`: one account: login → check-in → balance, restarted once on timeout
//! - `orchestrator`: all accounts in order, one result each, one batch at a time

pub mod orchestrator;
pub mod runner;

pub use orchestrator::{BatchOrchestrator, BatchPermit};
pub use runner::{AccountRunner, RunnerSettings};

#[cfg(test)]
pub(crate) mod fake;
