//! Seams between the orchestration logic and its collaborators.
//!
//! The browser-facing side is deliberately narrow: everything that depends on
//! the external site's markup lives behind [`SiteSession`], so the runner and
//! orchestrator can be driven by a fake in tests.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{Account, RunResult};

/// What happened when a check-in control was looked for and activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinAttempt {
    /// The control was activated; carries the scraped result text.
    Claimed(String),
    /// The site reports today's reward as already claimed.
    AlreadyClaimed,
    /// No usable check-in control on this path.
    NotFound,
}

/// One live browser session against the site.
#[async_trait]
pub trait SiteSession: Send {
    /// Install a `k=v; k2=v2` cookie string and check whether the site now
    /// treats the session as logged in.
    async fn restore_cookies(&mut self, cookie: &str) -> Result<bool>;

    /// Fill and submit the login form. `Ok(false)` means the site rejected
    /// the attempt or never left the login page.
    async fn submit_credentials(&mut self, email: &str, password: &str) -> Result<bool>;

    /// Full page refresh, used between login attempts.
    async fn refresh(&mut self) -> Result<()>;

    /// Primary path: the "trial check-in" entry point on the dashboard.
    async fn checkin_from_dashboard(&mut self) -> Result<CheckinAttempt>;

    /// Fallback path: visit a check-in URL directly and activate its control.
    async fn checkin_at_url(&mut self, url: &str) -> Result<CheckinAttempt>;

    /// Read the account balance text, e.g. `"12.50元"`.
    async fn read_balance(&mut self) -> Result<String>;

    /// Write a PNG screenshot of the current page.
    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Release the underlying browser resources.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for browser sessions.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(&self) -> Result<Box<dyn SiteSession>>;
}

/// Receives each run result as soon as it is produced (persistence).
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn record(&self, account: &Account, result: &RunResult) -> Result<()>;
}

/// Reports a finished batch somewhere. Implementations swallow their own
/// failures; a batch is never failed by its notification.
#[async_trait]
pub trait BatchNotifier: Send + Sync {
    async fn notify(&self, results: &[RunResult]);
}

/// Where a batch gets its account list at trigger time.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>>;
}

/// A fixed account list, e.g. straight from configuration.
#[async_trait]
impl AccountSource for Vec<Account> {
    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.clone())
    }
}
