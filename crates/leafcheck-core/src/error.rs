//! Error type shared by every leafcheck crate.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LeafcheckError>;

#[derive(Debug, thiserror::Error)]
pub enum LeafcheckError {
    #[error("Config error: {0}")]
    Config(String),

    /// Read timeout, page-load timeout or script timeout from the browser.
    #[error("Browser timeout: {0}")]
    Timeout(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("A check-in batch is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LeafcheckError {
    /// Whether this error belongs to the connectivity/read-timeout class
    /// that warrants restarting the browser session.
    pub fn is_timeout(&self) -> bool {
        match self {
            LeafcheckError::Timeout(_) => true,
            LeafcheckError::Browser(msg) => is_timeout_message(msg),
            _ => false,
        }
    }
}

/// Match the messages drivers produce when a read or page load times out.
pub fn is_timeout_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out") || lower.contains("read timeout") || lower.contains("timeout")
}
