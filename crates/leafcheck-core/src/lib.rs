//! # Leafcheck Core
//!
//! Shared building blocks for the check-in workspace:
//! - `config`: TOML config file overlaid by environment variables
//! - `error`: the crate-wide error type
//! - `types`: accounts, run results, batch results
//! - `traits`: seams between the orchestration logic and the outside world
//!   (site adapter, account source, persistence sink, batch notifier)

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{LeafcheckError, Result};
pub use traits::{
    AccountSource, BatchNotifier, CheckinAttempt, RunSink, SiteAdapter, SiteSession,
};
pub use types::{Account, BatchResult, RunOutcome, RunResult, UNKNOWN_BALANCE, mask_email};
