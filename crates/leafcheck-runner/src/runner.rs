//! Account runner: drives one account through a browser session.
//!
//! Flow: open session → log in (cookie, then credentials) → check in
//! (dashboard entry point, then each check-in URL) → read balance → close.
//! A timeout anywhere in that flow restarts the whole thing once on a fresh
//! session.

use futures::FutureExt;
use leafcheck_core::config::AppConfig;
use leafcheck_core::error::Result;
use leafcheck_core::traits::{CheckinAttempt, SiteAdapter, SiteSession};
use leafcheck_core::types::{Account, RunOutcome, UNKNOWN_BALANCE};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Message recorded when the site says today's reward is already claimed.
pub const ALREADY_CHECKED_IN: &str = "already checked in today";

/// Knobs for a single account run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub login_attempts: u32,
    pub login_retry_wait: Duration,
    /// Fallback check-in pages, tried in order after the dashboard.
    pub checkin_urls: Vec<String>,
    /// `k=v; k2=v2` session cookie tried before the login form.
    pub cookie: Option<String>,
    pub screenshot_dir: Option<PathBuf>,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            login_attempts: config.runner.login_attempts.max(1),
            login_retry_wait: Duration::from_secs(config.runner.login_retry_wait_secs),
            checkin_urls: config.checkin_urls(),
            cookie: config.site.cookie.clone().filter(|c| !c.trim().is_empty()),
            screenshot_dir: config.browser.screenshot_dir.as_ref().map(PathBuf::from),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Runs login → check-in → balance for one account at a time.
pub struct AccountRunner {
    adapter: Arc<dyn SiteAdapter>,
    settings: RunnerSettings,
}

impl AccountRunner {
    pub fn new(adapter: Arc<dyn SiteAdapter>, settings: RunnerSettings) -> Self {
        Self { adapter, settings }
    }

    /// Run one account to a final outcome. Never returns an error: anything
    /// unrecoverable becomes a failure outcome.
    pub async fn run(&self, account: &Account) -> RunOutcome {
        let who = account.masked();
        tracing::info!("🚀 [{who}] Starting check-in via {}", self.adapter.name());

        let first = self.attempt(account).await;
        let outcome = match first {
            Err(e) if e.is_timeout() => {
                tracing::warn!("⏱️ [{who}] Timed out ({e}), restarting browser and retrying once");
                self.attempt(account).await
            }
            other => other,
        };

        match outcome {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Success { message, balance } => {
                        tracing::info!("✅ [{who}] {message} (balance: {balance})")
                    }
                    RunOutcome::SoftFailure { reason } | RunOutcome::TerminalFailure { reason } => {
                        tracing::warn!("❌ [{who}] {reason}")
                    }
                }
                outcome
            }
            Err(e) => {
                tracing::error!("❌ [{who}] {e}");
                RunOutcome::TerminalFailure {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// One full pass on a fresh session. Timeout-class errors come back as
    /// `Err` so the caller can restart. The session is closed on every exit,
    /// including a panic inside the flow, which is re-raised afterwards.
    async fn attempt(&self, account: &Account) -> Result<RunOutcome> {
        let mut session = match self.adapter.open_session().await {
            Ok(session) => session,
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => {
                return Ok(RunOutcome::TerminalFailure {
                    reason: format!("browser session could not start: {e}"),
                });
            }
        };

        let result = match AssertUnwindSafe(self.sequence(session.as_mut(), account))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                self.close(session.as_mut(), account).await;
                std::panic::resume_unwind(panic);
            }
        };

        let stage = match &result {
            Ok(RunOutcome::Success { .. }) => None,
            Ok(RunOutcome::TerminalFailure { .. }) => Some("login"),
            Ok(RunOutcome::SoftFailure { .. }) => Some("checkin"),
            Err(_) => Some("error"),
        };
        if let Some(stage) = stage {
            self.capture(session.as_mut(), account, stage).await;
        }

        self.close(session.as_mut(), account).await;
        result
    }

    async fn close(&self, session: &mut dyn SiteSession, account: &Account) {
        if let Err(e) = session.close().await {
            tracing::warn!("⚠️ [{}] Failed to close browser session: {e}", account.masked());
        }
    }

    async fn sequence(&self, session: &mut dyn SiteSession, account: &Account) -> Result<RunOutcome> {
        if !self.login(session, account).await? {
            return Ok(RunOutcome::TerminalFailure {
                reason: format!(
                    "login failed after {} attempt(s)",
                    self.settings.login_attempts
                ),
            });
        }

        let Some(message) = self.checkin(session, account).await? else {
            return Ok(RunOutcome::SoftFailure {
                reason: "no check-in control found on the dashboard or any check-in URL".into(),
            });
        };

        let balance = match session.read_balance().await {
            Ok(balance) if !balance.trim().is_empty() => balance,
            Ok(_) => UNKNOWN_BALANCE.to_string(),
            Err(e) => {
                tracing::warn!("⚠️ [{}] Balance unavailable: {e}", account.masked());
                UNKNOWN_BALANCE.to_string()
            }
        };

        Ok(RunOutcome::Success { message, balance })
    }

    /// `Ok(false)` when every attempt was rejected.
    async fn login(&self, session: &mut dyn SiteSession, account: &Account) -> Result<bool> {
        let who = account.masked();

        if let Some(cookie) = &self.settings.cookie {
            match session.restore_cookies(cookie).await {
                Ok(true) => {
                    tracing::info!("🍪 [{who}] Logged in with session cookie");
                    return Ok(true);
                }
                Ok(false) => tracing::info!("🍪 [{who}] Cookie rejected, using the login form"),
                Err(e) => tracing::warn!("⚠️ [{who}] Cookie login errored ({e}), using the login form"),
            }
        }

        let attempts = self.settings.login_attempts;
        for attempt in 1..=attempts {
            tracing::info!("🔑 [{who}] Login attempt {attempt}/{attempts}");
            match session.submit_credentials(&account.email, &account.password).await {
                Ok(true) => return Ok(true),
                Ok(false) => tracing::warn!("⚠️ [{who}] Login attempt {attempt} rejected"),
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => tracing::warn!("⚠️ [{who}] Login attempt {attempt} failed: {e}"),
            }

            if attempt < attempts {
                match session.refresh().await {
                    Err(e) if e.is_timeout() => return Err(e),
                    Err(e) => tracing::debug!("Refresh before retry failed: {e}"),
                    Ok(()) => {}
                }
                tokio::time::sleep(self.settings.login_retry_wait).await;
            }
        }
        Ok(false)
    }

    /// Try each check-in path in order; `None` when none of them worked.
    async fn checkin(&self, session: &mut dyn SiteSession, account: &Account) -> Result<Option<String>> {
        let who = account.masked();

        let attempt = tolerate(session.checkin_from_dashboard().await, &who, "dashboard")?;
        if let Some(message) = claimed_message(attempt) {
            return Ok(Some(message));
        }

        for url in &self.settings.checkin_urls {
            tracing::info!("🔁 [{who}] Trying check-in page {url}");
            let attempt = tolerate(session.checkin_at_url(url).await, &who, url)?;
            if let Some(message) = claimed_message(attempt) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn capture(&self, session: &mut dyn SiteSession, account: &Account, stage: &str) {
        let Some(dir) = &self.settings.screenshot_dir else {
            return;
        };
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{}-{stage}-{stamp}.png", account.masked()));
        match session.screenshot(&path).await {
            Ok(()) => tracing::info!("📸 Saved screenshot {}", path.display()),
            Err(e) => tracing::debug!("Screenshot failed: {e}"),
        }
    }
}

/// A failed check-in path is just a miss unless it timed out.
fn tolerate(result: Result<CheckinAttempt>, who: &str, path: &str) -> Result<CheckinAttempt> {
    match result {
        Err(e) if e.is_timeout() => Err(e),
        Err(e) => {
            tracing::warn!("⚠️ [{who}] Check-in via {path} failed: {e}");
            Ok(CheckinAttempt::NotFound)
        }
        ok => ok,
    }
}

fn claimed_message(attempt: CheckinAttempt) -> Option<String> {
    match attempt {
        CheckinAttempt::Claimed(message) => Some(message),
        CheckinAttempt::AlreadyClaimed => Some(ALREADY_CHECKED_IN.to_string()),
        CheckinAttempt::NotFound => None,
    }
}
