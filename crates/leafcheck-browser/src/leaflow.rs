//! Leaflow site adapter: browser-driven login, check-in and balance read.
//!
//! Everything here depends on the site's current markup and wording. The
//! text search runs in page JavaScript so one round-trip covers the main
//! document, open shadow roots and same-origin iframes.

use async_trait::async_trait;
use leafcheck_core::config::{AppConfig, BrowserConfig};
use leafcheck_core::error::{LeafcheckError, Result};
use leafcheck_core::traits::{CheckinAttempt, SiteAdapter, SiteSession};
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::scrape;
use crate::webdriver::{ElementRef, WebDriverClient, WebDriverSession, chrome_capabilities};

const EMAIL_SELECTORS: &[&str] = &[
    "input[type='email']",
    "input[name='email']",
    "input[name='username']",
    "input[placeholder*='邮箱']",
    "input[placeholder*='email']",
    "input[type='text']",
];

const SUBMIT_SELECTORS: &[&str] = &["button[type='submit']", "input[type='submit']"];

const LOGIN_TEXTS: &[&str] = &["登录", "Login", "Sign in"];

const ERROR_SELECTORS: &[&str] = &[".error", ".alert-danger", "[class*='error']", "[class*='danger']"];

const NOTICE_SELECTORS: &[&str] = &[
    ".alert-success",
    ".ant-message-notice",
    ".el-message__content",
    ".modal-content",
    ".toast",
    ".notification",
    "[class*='success']",
    "[class*='message']",
];

const BALANCE_SELECTORS: &[&str] = &["[class*='balance']", "[class*='money']", "[class*='amount']"];

/// Finds a visible element whose text contains one of `arguments[0]`, in
/// order, across the document, open shadow roots and same-origin iframes.
/// Clicks it unless its text matches one of `arguments[1]` or it is disabled.
const CLICK_BY_TEXT_JS: &str = r#"
const texts = arguments[0];
const blocked = arguments[1];
const roots = [];
const collect = (root) => {
  roots.push(root);
  root.querySelectorAll('*').forEach((el) => { if (el.shadowRoot) collect(el.shadowRoot); });
};
collect(document);
document.querySelectorAll('iframe').forEach((f) => {
  try { if (f.contentDocument) collect(f.contentDocument); } catch (e) {}
});
const visible = (el) => { const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; };
const label = (el) => (el.innerText || el.textContent || '').trim();
for (const text of texts) {
  for (const root of roots) {
    let best = null;
    for (const el of root.querySelectorAll('button, a, [role="button"], div, span')) {
      const t = label(el);
      if (!t.includes(text) || !visible(el)) continue;
      if (el.tagName === 'BUTTON' || el.getAttribute('role') === 'button') { best = el; break; }
      if (!best || t.length < label(best).length) best = el;
    }
    if (best) {
      const target = best.closest('button, a, [role="button"]') || best;
      const t = label(target);
      if (target.disabled || blocked.some((b) => t.includes(b))) return { text: t, clicked: false };
      target.click();
      return { text: t, clicked: true };
    }
  }
}
return null;
"#;

/// Visible inner texts of everything matching any selector in `arguments[0]`.
const VISIBLE_TEXTS_JS: &str = r#"
const out = [];
for (const sel of arguments[0]) {
  document.querySelectorAll(sel).forEach((el) => {
    const r = el.getBoundingClientRect();
    const t = (el.innerText || '').trim();
    if (r.width > 0 && r.height > 0 && t) out.push(t);
  });
}
return out;
"#;

const BODY_TEXT_JS: &str = "return document.body ? document.body.innerText : '';";

const SCROLL_INTO_VIEW_JS: &str = "arguments[0].scrollIntoView({block: 'center'});";

const STOP_LOADING_JS: &str = "window.stop();";

/// Clicks the page margin at (10, 10), which closes overlays that dismiss on
/// an outside click.
const DISMISS_POPUP_JS: &str = r#"
const el = document.elementFromPoint(10, 10);
if (el) el.dispatchEvent(new MouseEvent('click', { bubbles: true, clientX: 10, clientY: 10 }));
"#;

/// Extra page loads after a failed navigation.
const NAVIGATION_RETRIES: u32 = 2;

/// Waits used between page interactions.
#[derive(Debug, Clone)]
struct Pacing {
    /// Pause after a navigation before touching the page.
    settle: Duration,
    poll_interval: Duration,
    /// How long to look for a form field or button.
    element_wait: Duration,
    /// How long to wait for the post-login redirect.
    login_wait: Duration,
    /// How long to look for the check-in control on a page.
    claim_wait: Duration,
    /// How long to wait for a result message after clicking.
    result_wait: Duration,
    /// How long a click may take to open its target in a new tab.
    new_window_wait: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
            element_wait: Duration::from_secs(10),
            login_wait: Duration::from_secs(40),
            claim_wait: Duration::from_secs(15),
            result_wait: Duration::from_secs(10),
            new_window_wait: Duration::from_secs(5),
        }
    }
}

/// Opens Chrome sessions through a WebDriver endpoint.
pub struct LeaflowSite {
    base_url: String,
    browser: BrowserConfig,
    pacing: Pacing,
}

impl LeaflowSite {
    pub fn new(base_url: &str, browser: BrowserConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            browser,
            pacing: Pacing::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.site.base_url, config.browser.clone())
    }

    #[cfg(test)]
    fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }
}

#[async_trait]
impl SiteAdapter for LeaflowSite {
    fn name(&self) -> &str {
        "leaflow"
    }

    async fn open_session(&self) -> Result<Box<dyn SiteSession>> {
        let client = WebDriverClient::new(
            &self.browser.webdriver_url,
            Duration::from_secs(self.browser.command_timeout_secs),
        )?;
        let driver = client.new_session(chrome_capabilities(&self.browser)).await?;
        tracing::info!("🌐 Browser session ready ({})", driver.id());
        Ok(Box::new(LeaflowSession {
            driver,
            base_url: self.base_url.clone(),
            pacing: self.pacing.clone(),
        }))
    }
}

/// One logged-in (or logging-in) browser session on Leaflow.
pub struct LeaflowSession {
    driver: WebDriverSession,
    base_url: String,
    pacing: Pacing,
}

#[derive(Debug)]
struct ClickOutcome {
    text: String,
    clicked: bool,
}

impl LeaflowSession {
    fn page(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Load `url` and let it settle. A failed load is stopped and retried;
    /// the last error comes back as is, so a timeout still restarts the run.
    async fn open_page(&self, url: &str) -> Result<()> {
        let mut retries = 0;
        loop {
            match self.driver.navigate(url).await {
                Ok(()) => {
                    tokio::time::sleep(self.pacing.settle).await;
                    return Ok(());
                }
                Err(e) if retries < NAVIGATION_RETRIES => {
                    retries += 1;
                    tracing::warn!("⚠️ Loading {url} failed ({e}), retry {retries}/{NAVIGATION_RETRIES}");
                    if let Err(e) = self.driver.execute(STOP_LOADING_JS, vec![]).await {
                        tracing::debug!("window.stop() failed: {e}");
                    }
                    tokio::time::sleep(self.pacing.settle).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dismiss_popup(&self) {
        if let Err(e) = self.driver.execute(DISMISS_POPUP_JS, vec![]).await {
            tracing::debug!("Popup dismissal skipped: {e}");
        }
    }

    /// Switch to a tab the last click opened, if one appears in time.
    async fn follow_new_window(&self, before: &[String]) -> Result<()> {
        let opened = poll(self.pacing.new_window_wait, self.pacing.poll_interval, || async {
            let handles = self.driver.window_handles().await?;
            Ok(handles.into_iter().rev().find(|h| !before.contains(h)))
        })
        .await?;

        if let Some(handle) = opened {
            tracing::info!("🪟 Check-in opened in a new window, switching");
            self.driver.switch_to_window(&handle).await?;
        }
        Ok(())
    }

    async fn body_text(&self) -> Result<String> {
        let value = self.driver.execute(BODY_TEXT_JS, vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn visible_texts(&self, selectors: &[&str]) -> Result<Vec<String>> {
        let value = self.driver.execute(VISIBLE_TEXTS_JS, vec![json!(selectors)]).await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(String::from).collect())
            .unwrap_or_default())
    }

    async fn click_by_text(&self, texts: &[&str]) -> Result<Option<ClickOutcome>> {
        let value = self
            .driver
            .execute(
                CLICK_BY_TEXT_JS,
                vec![json!(texts), json!(scrape::ALREADY_CLAIMED_TEXTS)],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(ClickOutcome {
            text: value["text"].as_str().unwrap_or_default().to_string(),
            clicked: value["clicked"].as_bool().unwrap_or(false),
        }))
    }

    /// First visible element matching any selector, polled up to `element_wait`.
    async fn wait_for_any(&self, selectors: &[&str]) -> Result<Option<ElementRef>> {
        poll(self.pacing.element_wait, self.pacing.poll_interval, || async {
            for selector in selectors {
                for el in self.driver.find_elements(selector).await? {
                    if self.driver.is_displayed(&el).await.unwrap_or(false) {
                        return Ok(Some(el));
                    }
                }
            }
            Ok(None)
        })
        .await
    }

    async fn fill(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.driver.execute_on(SCROLL_INTO_VIEW_JS, element).await.ok();
        self.driver.clear(element).await.ok();
        self.driver.send_keys(element, text).await
    }

    /// Find and activate the claim control on the current page, then scrape the result.
    async fn claim_on_current_page(&self) -> Result<CheckinAttempt> {
        let clicked = poll(self.pacing.claim_wait, self.pacing.poll_interval, || {
            self.click_by_text(scrape::CLAIM_TEXTS)
        })
        .await?;

        let Some(outcome) = clicked else {
            return Ok(CheckinAttempt::NotFound);
        };
        if !outcome.clicked {
            tracing::info!("ℹ️ Check-in control reads '{}', nothing to claim", outcome.text);
            return Ok(CheckinAttempt::AlreadyClaimed);
        }

        tracing::info!("🖱️ Clicked check-in control '{}'", outcome.text);
        tokio::time::sleep(self.pacing.settle).await;
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let result = poll(self.pacing.result_wait, self.pacing.poll_interval, || async {
            let notices = self.visible_texts(NOTICE_SELECTORS).await?;
            let body = self.body_text().await?;
            Ok(scrape::pick_result_text(&notices, &body, &today))
        })
        .await?;

        Ok(CheckinAttempt::Claimed(
            result.unwrap_or_else(|| scrape::NO_REWARD_TEXT.to_string()),
        ))
    }
}

#[async_trait]
impl SiteSession for LeaflowSession {
    async fn restore_cookies(&mut self, cookie: &str) -> Result<bool> {
        let pairs = scrape::parse_cookie_string(cookie);
        if pairs.is_empty() {
            return Ok(false);
        }

        // Cookies can only be set for the domain currently loaded.
        self.open_page(&self.base_url).await?;
        for (name, value) in &pairs {
            self.driver.add_cookie(name, value).await?;
        }
        self.open_page(&self.page("/dashboard")).await?;

        let url = self.driver.current_url().await?;
        Ok(scrape::looks_logged_in(&url))
    }

    async fn submit_credentials(&mut self, email: &str, password: &str) -> Result<bool> {
        self.open_page(&self.page("/login")).await?;
        self.dismiss_popup().await;

        let email_input = self
            .wait_for_any(EMAIL_SELECTORS)
            .await?
            .ok_or_else(|| LeafcheckError::ElementNotFound("email input".into()))?;
        self.fill(&email_input, email).await?;

        let password_input = self
            .wait_for_any(&["input[type='password']"])
            .await?
            .ok_or_else(|| LeafcheckError::ElementNotFound("password input".into()))?;
        self.fill(&password_input, password).await?;

        match self.wait_for_any(SUBMIT_SELECTORS).await? {
            Some(button) => self.driver.click(&button).await?,
            None => {
                self.click_by_text(LOGIN_TEXTS)
                    .await?
                    .ok_or_else(|| LeafcheckError::ElementNotFound("login button".into()))?;
            }
        }

        let landed = poll(self.pacing.login_wait, self.pacing.poll_interval, || async {
            let url = self.driver.current_url().await?;
            Ok(scrape::looks_logged_in(&url).then_some(url))
        })
        .await?;

        match landed {
            Some(url) => {
                tracing::info!("✅ Logged in, now at {url}");
                Ok(true)
            }
            None => {
                let errors = self.visible_texts(ERROR_SELECTORS).await.unwrap_or_default();
                if let Some(message) = errors.first() {
                    tracing::warn!("⚠️ Login form reported: {message}");
                }
                Ok(false)
            }
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        self.driver.refresh().await
    }

    async fn checkin_from_dashboard(&mut self) -> Result<CheckinAttempt> {
        let workspaces = self.page("/workspaces");
        let current = self.driver.current_url().await.unwrap_or_default();
        if current.starts_with(&workspaces) {
            tokio::time::sleep(self.pacing.settle).await;
        } else {
            self.open_page(&workspaces).await?;
        }

        let before = self.driver.window_handles().await?;
        let entry = poll(self.pacing.claim_wait, self.pacing.poll_interval, || {
            self.click_by_text(scrape::ENTRY_TEXTS)
        })
        .await?;

        match entry {
            None => {
                tracing::warn!("⚠️ No check-in entry point on the workspaces page");
                Ok(CheckinAttempt::NotFound)
            }
            Some(outcome) if !outcome.clicked => Ok(CheckinAttempt::AlreadyClaimed),
            Some(outcome) => {
                tracing::info!("🖱️ Opened check-in dialog via '{}'", outcome.text);
                self.follow_new_window(&before).await?;
                tokio::time::sleep(self.pacing.settle).await;
                self.claim_on_current_page().await
            }
        }
    }

    async fn checkin_at_url(&mut self, url: &str) -> Result<CheckinAttempt> {
        self.open_page(url).await?;
        self.claim_on_current_page().await
    }

    async fn read_balance(&mut self) -> Result<String> {
        self.open_page(&self.page("/dashboard")).await?;

        let mut text = self.visible_texts(BALANCE_SELECTORS).await?.join("\n");
        text.push('\n');
        text.push_str(&self.body_text().await?);

        scrape::extract_balance(&text)
            .ok_or_else(|| LeafcheckError::ElementNotFound("balance text".into()))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let png = self.driver.screenshot().await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, png).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.driver.delete().await
    }
}

/// Re-run `f` until it yields `Some`, an error, or `timeout` elapses.
async fn poll<T, F, Fut>(timeout: Duration, interval: Duration, mut f: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(found) = f().await? {
            return Ok(Some(found));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval).await;
    }
}
