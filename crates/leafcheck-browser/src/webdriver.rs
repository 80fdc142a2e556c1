//! Minimal W3C WebDriver client over HTTP (chromedriver, geckodriver, Selenium).
//!
//! Only the commands the site adapter needs are implemented.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use leafcheck_core::config::BrowserConfig;
use leafcheck_core::error::{LeafcheckError, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Key under which W3C drivers return element references.
pub(crate) const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Opaque handle to a DOM element inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

impl ElementRef {
    fn to_json(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Entry point: talks to the driver endpoint and creates sessions.
#[derive(Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    /// `command_timeout` bounds every HTTP round-trip; exceeding it is a
    /// read timeout in the sense of [`LeafcheckError::is_timeout`].
    pub fn new(base_url: &str, command_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(command_timeout)
            .build()
            .map_err(|e| LeafcheckError::Browser(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Start a new browser session.
    pub async fn new_session(&self, capabilities: Value) -> Result<WebDriverSession> {
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let value = send(&self.http, Method::POST, &format!("{}/session", self.base_url), Some(body)).await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| LeafcheckError::Browser("New session response has no sessionId".into()))?
            .to_string();
        tracing::debug!("🌐 WebDriver session started: {session_id}");
        Ok(WebDriverSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            session_id,
            closed: false,
        })
    }
}

/// Chrome capabilities for an unattended run.
pub fn chrome_capabilities(config: &BrowserConfig) -> Value {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--window-size=1920,1080".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={USER_AGENT}"),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }

    let mut chrome_options = json!({
        "args": args,
        "excludeSwitches": ["enable-automation"],
    });
    if let Some(binary) = &config.chrome_binary {
        chrome_options["binary"] = json!(binary);
    }

    json!({
        "browserName": "chrome",
        "pageLoadStrategy": "normal",
        "timeouts": {
            "pageLoad": config.page_load_timeout_secs * 1000,
            "script": config.script_timeout_secs * 1000,
        },
        "goog:chromeOptions": chrome_options,
    })
}

/// One browser session. Call [`WebDriverSession::delete`] when done.
pub struct WebDriverSession {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
    closed: bool,
}

impl WebDriverSession {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        if self.closed {
            return Err(LeafcheckError::Browser("Session already closed".into()));
        }
        send(&self.http, method, &self.url(path), body).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn refresh(&self) -> Result<()> {
        self.command(Method::POST, "/refresh", Some(json!({}))).await?;
        Ok(())
    }

    /// Find all elements matching a CSS selector. An empty result is not an error.
    pub async fn find_elements(&self, css: &str) -> Result<Vec<ElementRef>> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item[ELEMENT_KEY].as_str())
                    .map(|id| ElementRef(id.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn is_displayed(&self, element: &ElementRef) -> Result<bool> {
        let value = self
            .command(Method::GET, &format!("/element/{}/displayed", element.0), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn click(&self, element: &ElementRef) -> Result<()> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), Some(json!({})))
            .await?;
        Ok(())
    }

    pub async fn clear(&self, element: &ElementRef) -> Result<()> {
        self.command(Method::POST, &format!("/element/{}/clear", element.0), Some(json!({})))
            .await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    /// Handles of every open tab or window, in driver order.
    pub async fn window_handles(&self) -> Result<Vec<String>> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(String::from).collect())
            .unwrap_or_default())
    }

    pub async fn switch_to_window(&self, handle: &str) -> Result<()> {
        self.command(Method::POST, "/window", Some(json!({ "handle": handle })))
            .await?;
        Ok(())
    }

    /// Run synchronous JavaScript and return its result.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    /// Run JavaScript with an element as `arguments[0]`.
    pub async fn execute_on(&self, script: &str, element: &ElementRef) -> Result<Value> {
        self.execute(script, vec![element.to_json()]).await
    }

    pub async fn add_cookie(&self, name: &str, value: &str) -> Result<()> {
        self.command(
            Method::POST,
            "/cookie",
            Some(json!({ "cookie": { "name": name, "value": value } })),
        )
        .await?;
        Ok(())
    }

    /// PNG bytes of the current viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| LeafcheckError::Browser("Screenshot response is not a string".into()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| LeafcheckError::Browser(format!("Screenshot decode failed: {e}")))
    }

    /// End the session. Safe to call more than once.
    pub async fn delete(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        send(&self.http, Method::DELETE, &self.url(""), None).await?;
        tracing::debug!("🌐 WebDriver session closed: {}", self.session_id);
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("⚠️ WebDriver session {} dropped without delete", self.session_id);
        }
    }
}

/// Send one command and unwrap the `value` envelope, mapping wire errors.
async fn send(http: &reqwest::Client, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
    let mut req = http.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }

    let resp = req.send().await.map_err(map_transport_error)?;
    let status = resp.status();
    let payload: Value = resp.json().await.map_err(map_transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    match serde_json::from_value::<WireError>(value) {
        Ok(err) => Err(map_wire_error(&err.error, &err.message)),
        Err(_) => Err(LeafcheckError::Browser(format!("WebDriver HTTP {status}"))),
    }
}

fn map_transport_error(e: reqwest::Error) -> LeafcheckError {
    if e.is_timeout() {
        LeafcheckError::Timeout(format!("WebDriver read timed out: {e}"))
    } else {
        LeafcheckError::Browser(format!("WebDriver request failed: {e}"))
    }
}

fn map_wire_error(code: &str, message: &str) -> LeafcheckError {
    match code {
        "timeout" | "script timeout" => LeafcheckError::Timeout(format!("{code}: {message}")),
        "no such element" => LeafcheckError::ElementNotFound(message.to_string()),
        _ => LeafcheckError::Browser(format!("{code}: {message}")),
    }
}
