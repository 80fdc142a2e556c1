//! Leafcheck configuration system.
//!
//! A TOML file provides the base layer; environment variables (the way the
//! service is usually deployed in containers and CI) override it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LeafcheckError, Result};
use crate::types::Account;

/// Check-in page used when nothing else is configured.
pub const DEFAULT_CHECKIN_URL: &str = "https://checkin.leaflow.net";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load from `path` if it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LeafcheckError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LeafcheckError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LeafcheckError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Multi-account list wins; the single pair is only a fallback.
        let mut env_accounts = get("LEAFLOW_ACCOUNTS")
            .map(|raw| parse_accounts(&raw))
            .unwrap_or_default();
        if env_accounts.is_empty()
            && let (Some(email), Some(password)) = (get("LEAFLOW_EMAIL"), get("LEAFLOW_PASSWORD"))
        {
            env_accounts.push(Account::new(email, password));
        }
        if !env_accounts.is_empty() {
            tracing::debug!("Loaded {} account(s) from environment", env_accounts.len());
            self.accounts = env_accounts;
        }

        if let Some(cookie) = get("LEAFLOW_COOKIE") {
            self.site.cookie = Some(cookie);
        }

        let mut urls: Vec<String> = get("LEAFLOW_CHECKIN_URLS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        if let Some(single) = get("LEAFLOW_CHECKIN_URL") {
            urls.push(single);
        }
        if !urls.is_empty() {
            self.site.checkin_urls = urls;
        }

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.notify.telegram.bot_token = token;
        }
        if let Some(chat_id) = get("TELEGRAM_CHAT_ID") {
            self.notify.telegram.chat_id = chat_id;
        }
        if let Some(url) = get("NOTIFY_WEBHOOK_URL") {
            self.notify.webhook_url = url;
        }

        if let Some(hour) = parse_env_number::<u32>("CRON_HOUR", get("CRON_HOUR")) {
            self.schedule.hour = hour;
        }
        if let Some(minute) = parse_env_number::<u32>("CRON_MINUTE", get("CRON_MINUTE")) {
            self.schedule.minute = minute;
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            self.gateway.admin_token = token;
        }
        if let Some(port) = parse_env_number::<u16>("PORT", get("PORT")) {
            self.gateway.port = port;
        }
        if let Some(path) = get("DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(dir) = get("LOG_DIR") {
            self.storage.log_dir = dir;
        }

        if let Some(url) = get("WEBDRIVER_URL") {
            self.browser.webdriver_url = url;
        }
        if let Some(bin) = get("CHROME_BIN") {
            self.browser.chrome_binary = Some(bin);
        }
        if let Some(headless) = get("HEADLESS") {
            self.browser.headless = !matches!(headless.to_lowercase().as_str(), "0" | "false" | "no");
        }
    }

    /// Check-in URLs to try after the dashboard path, deduplicated in order.
    pub fn checkin_urls(&self) -> Vec<String> {
        let mut urls = dedup_preserving_order(&self.site.checkin_urls);
        if urls.is_empty() {
            urls.push(DEFAULT_CHECKIN_URL.to_string());
        }
        urls
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.hour > 23 || self.schedule.minute > 59 {
            return Err(LeafcheckError::Config(format!(
                "Invalid schedule time {:02}:{:02}",
                self.schedule.hour, self.schedule.minute
            )));
        }
        if self.runner.login_attempts == 0 {
            return Err(LeafcheckError::Config("runner.login_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Target site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub checkin_urls: Vec<String>,
    /// Session cookie string (`k=v; k2=v2`) tried before credentials.
    #[serde(default)]
    pub cookie: Option<String>,
}

fn default_base_url() -> String { "https://leaflow.net".into() }

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            checkin_urls: Vec::new(),
            cookie: None,
        }
    }
}

/// WebDriver / Chrome configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "bool_true")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_binary: Option<String>,
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,
    /// HTTP read timeout for each WebDriver command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Where error-path screenshots go. `None` disables them.
    #[serde(default)]
    pub screenshot_dir: Option<String>,
}

fn bool_true() -> bool { true }
fn default_webdriver_url() -> String { "http://localhost:9515".into() }
fn default_page_load_timeout() -> u64 { 60 }
fn default_script_timeout() -> u64 { 30 }
fn default_command_timeout() -> u64 { 120 }

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: true,
            chrome_binary: None,
            page_load_timeout_secs: default_page_load_timeout(),
            script_timeout_secs: default_script_timeout(),
            command_timeout_secs: default_command_timeout(),
            screenshot_dir: None,
        }
    }
}

/// Account runner / orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default = "default_login_retry_wait")]
    pub login_retry_wait_secs: u64,
    /// Pause between accounts in a batch.
    #[serde(default = "default_account_delay")]
    pub account_delay_secs: u64,
}

fn default_login_attempts() -> u32 { 3 }
fn default_login_retry_wait() -> u64 { 5 }
fn default_account_delay() -> u64 { 5 }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            login_attempts: default_login_attempts(),
            login_retry_wait_secs: default_login_retry_wait(),
            account_delay_secs: default_account_delay(),
        }
    }
}

/// Daily trigger time (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default = "default_minute")]
    pub minute: u32,
    /// Optional `"M H * * *"` expression; overrides hour/minute when set.
    #[serde(default)]
    pub cron: Option<String>,
}

// 01:15 UTC is 09:15 in Beijing.
fn default_hour() -> u32 { 1 }
fn default_minute() -> u32 { 15 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_hour(),
            minute: default_minute(),
            cron: None,
        }
    }
}

/// Notification targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Generic JSON webhook; empty disables it.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api(),
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// HTTP control panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for `/api/*`; empty disables auth.
    #[serde(default)]
    pub admin_token: String,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8080 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_token: String::new(),
        }
    }
}

/// Files on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_db_path() -> String { "./data/leafcheck.db".into() }
fn default_log_dir() -> String { "./data".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
        }
    }
}

/// Parse `email1:pass1,email2:pass2`. Each pair splits on its first `:`;
/// pairs without a separator or with an empty side are skipped.
pub fn parse_accounts(raw: &str) -> Vec<Account> {
    let mut accounts = Vec::new();
    for (i, pair) in raw.split(',').map(str::trim).filter(|p| !p.is_empty()).enumerate() {
        let Some((email, password)) = pair.split_once(':') else {
            tracing::warn!("Account pair #{} has no ':' separator, skipped", i + 1);
            continue;
        };
        let (email, password) = (email.trim(), password.trim());
        if email.is_empty() || password.is_empty() {
            tracing::warn!("Account pair #{} is missing email or password, skipped", i + 1);
            continue;
        }
        accounts.push(Account::new(email, password));
    }
    accounts
}

/// Comma-separated list with blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
        .map(String::from)
        .collect()
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring {key}={value}: not a valid number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_accounts() {
        let accounts = parse_accounts("a@x.com:p1, b@x.com:p:with:colons ,broken,:nopass,c@x.com:");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].email, "a@x.com");
        assert_eq!(accounts[1].password, "p:with:colons");
    }

    #[test]
    fn test_multi_accounts_take_priority() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_from(env(&[
            ("LEAFLOW_ACCOUNTS", "a@x.com:p1,b@x.com:p2"),
            ("LEAFLOW_EMAIL", "single@x.com"),
            ("LEAFLOW_PASSWORD", "sp"),
        ]));
        assert_eq!(cfg.accounts.len(), 2);
    }

    #[test]
    fn test_single_account_fallback() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_from(env(&[
            ("LEAFLOW_ACCOUNTS", "garbage"),
            ("LEAFLOW_EMAIL", "single@x.com"),
            ("LEAFLOW_PASSWORD", "sp"),
        ]));
        assert_eq!(cfg.accounts, vec![Account::new("single@x.com", "sp")]);
    }

    #[test]
    fn test_env_keeps_file_accounts_when_unset() {
        let mut cfg = AppConfig {
            accounts: vec![Account::new("file@x.com", "p")],
            ..Default::default()
        };
        cfg.apply_env_from(env(&[]));
        assert_eq!(cfg.accounts.len(), 1);
    }

    #[test]
    fn test_checkin_urls_dedup_and_default() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.checkin_urls(), vec![DEFAULT_CHECKIN_URL.to_string()]);

        let mut cfg = AppConfig::default();
        cfg.apply_env_from(env(&[
            ("LEAFLOW_CHECKIN_URLS", "https://a.test, https://b.test,https://a.test"),
            ("LEAFLOW_CHECKIN_URL", "https://b.test"),
        ]));
        assert_eq!(cfg.checkin_urls(), vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn test_numeric_env_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_from(env(&[("CRON_HOUR", "7"), ("CRON_MINUTE", "oops"), ("PORT", "9000")]));
        assert_eq!(cfg.schedule.hour, 7);
        assert_eq!(cfg.schedule.minute, 15);
        assert_eq!(cfg.gateway.port, 9000);
    }

    #[test]
    fn test_validate() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.schedule.hour = 24;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leafcheck.toml");
        let mut cfg = AppConfig::default();
        cfg.accounts.push(Account::new("a@x.com", "p1"));
        cfg.notify.telegram.chat_id = "42".into();
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.accounts, cfg.accounts);
        assert_eq!(loaded.notify.telegram.chat_id, "42");
        assert_eq!(loaded.schedule.hour, 1);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.gateway.port, 8080);
        assert!(cfg.accounts.is_empty());
    }
}
