//! # Leafcheck Gateway
//!
//! Control panel for the check-in service: an Axum HTTP API plus an embedded
//! HTML page, backed by a SQLite store of accounts and run history.

pub mod dashboard;
pub mod db;
pub mod routes;
pub mod server;

pub use db::CheckinDb;
pub use server::{AppState, build_router, start};

/// Check-in logs rotate daily as `checkin.<YYYY-MM-DD>.log` in the log
/// directory; only the newest files are kept.
pub const LOG_FILE_PREFIX: &str = "checkin";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_FILES_KEPT: usize = 7;
