//! Data model: accounts and the results a batch produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A site account. Identity is the email address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Storage row id, when the account was loaded from the database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub email: String,
    pub password: String,
}

impl Account {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Email with most of the local part hidden, for logs and messages.
    pub fn masked(&self) -> String {
        mask_email(&self.email)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.masked())
            .field("password", &"••••")
            .finish()
    }
}

/// Outcome of one account run, as reported by the account runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Logged in and checked in.
    Success { message: String, balance: String },
    /// UI shape did not match any strategy; the batch moves on.
    SoftFailure { reason: String },
    /// Credentials rejected after all attempts, or no browser session.
    TerminalFailure { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    /// Convert into the persisted record for `email`.
    pub fn into_result(self, email: &str) -> RunResult {
        match self {
            RunOutcome::Success { message, balance } => RunResult::new(email, true, message, balance),
            RunOutcome::SoftFailure { reason } => {
                RunResult::failure(email, format!("Check-in failed: {reason}"))
            }
            RunOutcome::TerminalFailure { reason } => {
                RunResult::failure(email, format!("Auto check-in failed: {reason}"))
            }
        }
    }
}

/// Balance placeholder when it could not be read.
pub const UNKNOWN_BALANCE: &str = "unknown";

/// One account's result in a batch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub email: String,
    pub success: bool,
    pub result: String,
    pub balance: String,
    pub timestamp: DateTime<Utc>,
}

impl RunResult {
    pub fn new(
        email: impl Into<String>,
        success: bool,
        result: impl Into<String>,
        balance: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            success,
            result: result.into(),
            balance: balance.into(),
            timestamp: Utc::now(),
        }
    }

    /// Failure record; an empty message is replaced so failures always explain themselves.
    pub fn failure(email: impl Into<String>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Check-in failed for an unknown reason".to_string();
        }
        Self::new(email, false, message, UNKNOWN_BALANCE)
    }
}

/// Ordered results of one orchestration pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub results: Vec<RunResult>,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// True when every account succeeded (vacuously true for an empty batch).
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Hide an email for display: the first three characters of the local part
/// (fewer if it is shorter), `***`, then the domain.
pub fn mask_email(email: &str) -> String {
    let (local, domain) = match email.find('@') {
        Some(at) => (&email[..at], &email[at..]),
        None => (email, ""),
    };
    let visible: String = local.chars().take(3).collect();
    format!("{visible}***{domain}")
}
