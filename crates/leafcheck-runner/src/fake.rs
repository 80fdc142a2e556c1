//! Scripted in-memory site used by the runner and orchestrator tests.

use async_trait::async_trait;
use leafcheck_core::error::{LeafcheckError, Result};
use leafcheck_core::traits::{CheckinAttempt, SiteAdapter, SiteSession};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// How the fake site behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub cookie_ok: bool,
    /// Result of each credential submission in order; `true` once exhausted.
    pub login_results: Vec<bool>,
    pub dashboard: CheckinAttempt,
    /// Outcomes per check-in URL; unknown URLs yield `NotFound`.
    pub urls: Vec<(String, CheckinAttempt)>,
    /// The first N sessions time out on the dashboard.
    pub timeout_sessions: u32,
    /// The first N sessions time out while submitting credentials.
    pub login_timeout_sessions: u32,
    pub balance: Option<String>,
    pub open_fails: bool,
    /// Submitting credentials for this email panics.
    pub panic_for: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            cookie_ok: false,
            login_results: Vec::new(),
            dashboard: CheckinAttempt::Claimed("签到成功 +1.00".into()),
            urls: Vec::new(),
            timeout_sessions: 0,
            login_timeout_sessions: 0,
            balance: Some("12.50元".into()),
            open_fails: false,
            panic_for: None,
        }
    }
}

/// What the runner did to the fake site.
#[derive(Debug, Default)]
pub struct Calls {
    opened: AtomicU32,
    closed: AtomicU32,
    logins: AtomicU32,
    refreshes: AtomicU32,
    visited: Mutex<Vec<String>>,
    emails: Mutex<Vec<String>>,
    screenshots: Mutex<Vec<PathBuf>>,
}

impl Calls {
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }
    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
    /// Emails submitted to the login form, in order.
    pub fn emails(&self) -> Vec<String> {
        self.emails.lock().unwrap().clone()
    }
    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.screenshots.lock().unwrap().clone()
    }
}

pub struct FakeSite {
    script: Script,
    pub calls: Arc<Calls>,
}

impl FakeSite {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn adapter(&self) -> Arc<dyn SiteAdapter> {
        Arc::new(FakeAdapter {
            script: self.script.clone(),
            calls: self.calls.clone(),
        })
    }
}

struct FakeAdapter {
    script: Script,
    calls: Arc<Calls>,
}

#[async_trait]
impl SiteAdapter for FakeAdapter {
    fn name(&self) -> &str {
        "fake"
    }

    async fn open_session(&self) -> Result<Box<dyn SiteSession>> {
        if self.script.open_fails {
            return Err(LeafcheckError::Browser("connection refused".into()));
        }
        let number = self.calls.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            calls: self.calls.clone(),
            number,
            login_calls: 0,
        }))
    }
}

struct FakeSession {
    script: Script,
    calls: Arc<Calls>,
    number: u32,
    login_calls: usize,
}

#[async_trait]
impl SiteSession for FakeSession {
    async fn restore_cookies(&mut self, _cookie: &str) -> Result<bool> {
        Ok(self.script.cookie_ok)
    }

    async fn submit_credentials(&mut self, email: &str, _password: &str) -> Result<bool> {
        if self.script.panic_for.as_deref() == Some(email) {
            panic!("scripted panic for {email}");
        }
        if self.number <= self.script.login_timeout_sessions {
            return Err(LeafcheckError::Timeout("login page load timed out".into()));
        }
        self.calls.logins.fetch_add(1, Ordering::SeqCst);
        self.calls.emails.lock().unwrap().push(email.to_string());
        let ok = self
            .script
            .login_results
            .get(self.login_calls)
            .copied()
            .unwrap_or(true);
        self.login_calls += 1;
        Ok(ok)
    }

    async fn refresh(&mut self) -> Result<()> {
        self.calls.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn checkin_from_dashboard(&mut self) -> Result<CheckinAttempt> {
        if self.number <= self.script.timeout_sessions {
            return Err(LeafcheckError::Timeout("read timed out".into()));
        }
        Ok(self.script.dashboard.clone())
    }

    async fn checkin_at_url(&mut self, url: &str) -> Result<CheckinAttempt> {
        self.calls.visited.lock().unwrap().push(url.to_string());
        Ok(self
            .script
            .urls
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, attempt)| attempt.clone())
            .unwrap_or(CheckinAttempt::NotFound))
    }

    async fn read_balance(&mut self) -> Result<String> {
        self.script
            .balance
            .clone()
            .ok_or_else(|| LeafcheckError::ElementNotFound("balance".into()))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.calls.screenshots.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
