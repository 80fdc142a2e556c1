//! API route handlers for the control panel.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use leafcheck_core::config::{AppConfig, split_list};
use leafcheck_core::error::LeafcheckError;
use leafcheck_core::types::mask_email;
use serde_json::{Value, json};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<Value>);

/// Lines returned by `/api/logs`.
const LOG_TAIL_LINES: usize = 100;
/// Bytes read from the end of the log file to find those lines.
const LOG_TAIL_BYTES: u64 = 64 * 1024;
const DEFAULT_RUNS_LIMIT: u32 = 50;
const MAX_RUNS_LIMIT: u32 = 500;

/// Mask a secret for display: first 4 characters, then dots.
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if s.chars().count() <= 4 {
        return "••••".to_string();
    }
    format!("{}••••", s.chars().take(4).collect::<String>())
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({"ok": false, "error": message.into()})))
}

/// Health check endpoint (public).
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let scheduler = state.scheduler.as_ref();
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler": scheduler.is_some(),
        "schedule": scheduler.map(|s| s.schedule().describe().to_string()),
        "next_run": scheduler.and_then(|s| s.next_run()).map(|t| t.to_rfc3339()),
    }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "running": state.orchestrator.is_running(),
        "next_run": state
            .scheduler
            .as_ref()
            .and_then(|s| s.next_run())
            .map(|t| t.to_rfc3339()),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Current configuration with every secret masked.
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResponse {
    let cfg = match state.config.lock() {
        Ok(cfg) => cfg.clone(),
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, format!("Lock: {e}")),
    };
    (StatusCode::OK, Json(masked_config(&cfg)))
}

fn masked_config(cfg: &AppConfig) -> Value {
    let mut value = serde_json::to_value(cfg).unwrap_or_else(|_| json!({}));
    value["accounts"] = cfg
        .accounts
        .iter()
        .map(|a| json!({"email": mask_email(&a.email), "password": "••••"}))
        .collect();
    value["site"]["cookie"] = json!(cfg.site.cookie.as_deref().map(mask_secret));
    value["notify"]["telegram"]["bot_token"] = json!(mask_secret(&cfg.notify.telegram.bot_token));
    value["notify"]["webhook_url"] = json!(mask_secret(&cfg.notify.webhook_url));
    value["gateway"]["admin_token"] = json!(mask_secret(&cfg.gateway.admin_token));
    value
}

/// Apply the fields of a `POST /api/config` body. Masked values (as
/// returned by `GET /api/config`) are skipped so a round-trip never clobbers
/// a secret.
fn apply_update(cfg: &mut AppConfig, req: &Value) {
    let str_field = |key: &str| {
        req.get(key)
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.contains('•'))
    };
    let num_field = |key: &str| req.get(key).and_then(|v| v.as_u64());
    let small_field = |key: &str| num_field(key).map(|v| u32::try_from(v).unwrap_or(u32::MAX));

    if let Some(v) = str_field("telegram_bot_token") {
        cfg.notify.telegram.bot_token = v;
    }
    if let Some(v) = str_field("telegram_chat_id") {
        cfg.notify.telegram.chat_id = v;
    }
    if let Some(v) = str_field("webhook_url") {
        cfg.notify.webhook_url = v;
    }
    if let Some(v) = str_field("cookie") {
        cfg.site.cookie = Some(v).filter(|c| !c.is_empty());
    }
    match req.get("checkin_urls") {
        Some(Value::Array(items)) => {
            cfg.site.checkin_urls = items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Some(Value::String(raw)) => cfg.site.checkin_urls = split_list(raw),
        _ => {}
    }
    if let Some(v) = small_field("cron_hour") {
        cfg.schedule.hour = v;
    }
    if let Some(v) = small_field("cron_minute") {
        cfg.schedule.minute = v;
    }
    if let Some(v) = str_field("cron") {
        cfg.schedule.cron = Some(v).filter(|c| !c.is_empty());
    }
    if let Some(v) = req.get("schedule_enabled").and_then(|v| v.as_bool()) {
        cfg.schedule.enabled = v;
    }
    if let Some(v) = str_field("webdriver_url").filter(|v| !v.is_empty()) {
        cfg.browser.webdriver_url = v;
    }
    if let Some(v) = req.get("headless").and_then(|v| v.as_bool()) {
        cfg.browser.headless = v;
    }
    if let Some(v) = small_field("login_attempts") {
        cfg.runner.login_attempts = v;
    }
    if let Some(v) = num_field("account_delay_secs") {
        cfg.runner.account_delay_secs = v;
    }
}

/// Partially update the config file. Only the file layer is rewritten:
/// values that came from the environment stay out of it.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Value>,
) -> ApiResponse {
    let mut file_cfg = match AppConfig::load(&state.config_path) {
        Ok(cfg) => cfg,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    apply_update(&mut file_cfg, &req);

    let live_cfg = {
        let mut cfg = match state.config.lock() {
            Ok(cfg) => cfg,
            Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, format!("Lock: {e}")),
        };
        let mut updated = cfg.clone();
        apply_update(&mut updated, &req);
        if let Err(e) = updated.validate().and_then(|_| file_cfg.validate()) {
            return error(StatusCode::BAD_REQUEST, e.to_string());
        }
        if let Err(e) = file_cfg.save_to(&state.config_path) {
            tracing::error!("❌ Failed to save config: {e}");
            return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        *cfg = updated.clone();
        updated
    };
    tracing::info!("✅ Config saved to {}", state.config_path.display());

    if let Some(notifier) = &state.notifier {
        notifier.reload(&live_cfg.notify);
    }

    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "message": "Config saved. Notification changes apply to the next batch; browser and schedule changes after restart.",
        })),
    )
}

/// Last lines of the newest check-in log file.
pub async fn tail_logs(State(state): State<Arc<AppState>>) -> ApiResponse {
    let Some(path) = latest_log_file(&state.log_dir).await else {
        return (StatusCode::OK, Json(json!({"lines": []})));
    };
    match read_tail(&path, LOG_TAIL_BYTES).await {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(LOG_TAIL_LINES);
            (StatusCode::OK, Json(json!({"lines": &lines[start..]})))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::OK, Json(json!({"lines": []})))
        }
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Read log: {e}")),
    }
}

/// Newest `checkin.*.log` by modification time, then by name.
async fn latest_log_file(dir: &std::path::Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let prefix = format!("{}.", crate::LOG_FILE_PREFIX);
    let suffix = format!(".{}", crate::LOG_FILE_SUFFIX);

    let mut newest: Option<(std::time::SystemTime, String, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) || !name.ends_with(&suffix) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        let candidate = (modified, name, entry.path());
        if newest.as_ref().is_none_or(|best| (&candidate.0, &candidate.1) > (&best.0, &best.1)) {
            newest = Some(candidate);
        }
    }
    newest.map(|(_, _, path)| path)
}

/// At most the last `max_bytes` of a file, starting at a line boundary.
async fn read_tail(path: &std::path::Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if start > 0 {
        // first line is cut
        match text.find('\n') {
            Some(i) => text.replace_range(..=i, ""),
            None => text.clear(),
        }
    }
    Ok(text)
}

/// Run a batch and wait for it. The batch itself runs on its own task so a
/// dropped client connection does not cancel it midway.
pub async fn run_now(State(state): State<Arc<AppState>>) -> ApiResponse {
    let accounts = match state.db.load_accounts() {
        Ok(accounts) => accounts,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.try_run(&accounts).await });

    match handle.await {
        Ok(Ok(batch)) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "success": batch.success_count(),
                "total": batch.total(),
                "items": batch.results,
            })),
        ),
        Ok(Err(LeafcheckError::AlreadyRunning)) => error(StatusCode::CONFLICT, "already running"),
        Ok(Err(LeafcheckError::Config(msg))) => error(StatusCode::BAD_REQUEST, msg),
        Ok(Err(e)) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Batch task failed: {e}")),
    }
}

/// Start a batch in the background and return immediately. The running
/// flag is taken before responding, so a second trigger sees 409.
pub async fn run_async(State(state): State<Arc<AppState>>) -> ApiResponse {
    let accounts = match state.db.load_accounts() {
        Ok(accounts) => accounts,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    if accounts.is_empty() {
        return error(StatusCode::BAD_REQUEST, "no accounts configured");
    }
    let permit = match state.orchestrator.reserve() {
        Ok(permit) => permit,
        Err(_) => return error(StatusCode::CONFLICT, "already running"),
    };

    tokio::spawn(async move {
        if let Err(e) = permit.run(&accounts).await {
            tracing::warn!("⚠️ Background check-in not started: {e}");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"ok": true, "message": "started"})))
}

pub async fn list_accounts(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.list_accounts() {
        Ok(items) => (StatusCode::OK, Json(json!({"items": items}))),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn add_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Value>,
) -> ApiResponse {
    let field = |key: &str| req.get(key).and_then(|v| v.as_str()).map(str::trim).unwrap_or("");
    let (email, password) = (field("email"), field("password"));
    if email.is_empty() || password.is_empty() {
        return error(StatusCode::BAD_REQUEST, "email/password required");
    }

    match state.db.add_account(email, password) {
        Ok(id) => {
            tracing::info!("➕ Account added: {}", mask_email(email));
            (StatusCode::OK, Json(json!({"ok": true, "id": id})))
        }
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.delete_account(id) {
        Ok(true) => {
            tracing::info!("🗑️ Account {id} deleted");
            (StatusCode::OK, Json(json!({"ok": true})))
        }
        Ok(false) => error(StatusCode::NOT_FOUND, format!("account {id} not found")),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct RunsQuery {
    limit: Option<u32>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> ApiResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    match state.db.list_runs(limit) {
        Ok(items) => (StatusCode::OK, Json(json!({"items": items}))),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
