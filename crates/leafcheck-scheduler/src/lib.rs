//! # Leafcheck Scheduler
//!
//! Daily trigger and batch result notifications.
//!
//! ```text
//! SchedulerEngine (tokio interval)
//!   ├── DailySchedule: "01:15 UTC" or "15 1 * * *"
//!   └── on due → BatchOrchestrator::try_run
//!                  └── Notifier (BatchNotifier)
//!                        ├── Telegram (sendMessage, HTML)
//!                        └── Webhook (HTTP POST, JSON)
//! ```

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod notify;

pub use cron::DailySchedule;
pub use dispatch::{Notifier, NotifyTarget};
pub use engine::{FireOutcome, SchedulerEngine, spawn_scheduler};
pub use notify::BatchSummary;
