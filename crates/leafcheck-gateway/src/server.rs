//! HTTP server implementation using Axum.

use axum::response::{Html, IntoResponse};
use axum::{
    Router,
    extract::{Query, State},
    routing::{delete, get, post},
};
use leafcheck_core::config::AppConfig;
use leafcheck_runner::BatchOrchestrator;
use leafcheck_scheduler::{Notifier, SchedulerEngine};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::CheckinDb;

/// Shared state for the control panel.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Mutex<AppConfig>>,
    pub config_path: PathBuf,
    /// `None` disables auth on `/api/*`.
    pub admin_token: Option<String>,
    pub db: Arc<CheckinDb>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub scheduler: Option<Arc<SchedulerEngine>>,
    /// Reloaded when notification settings change through the API.
    pub notifier: Option<Arc<Notifier>>,
    /// Directory whose newest check-in log `/api/logs` tails.
    pub log_dir: PathBuf,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        config_path: PathBuf,
        db: Arc<CheckinDb>,
        orchestrator: Arc<BatchOrchestrator>,
    ) -> Self {
        let admin_token = Some(config.gateway.admin_token.trim().to_string()).filter(|t| !t.is_empty());
        let log_dir = PathBuf::from(&config.storage.log_dir);
        Self {
            config: Arc::new(Mutex::new(config)),
            config_path,
            admin_token,
            db,
            orchestrator,
            scheduler: None,
            notifier: None,
            log_dir,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<SchedulerEngine>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

/// Serve the control panel page.
async fn dashboard_page() -> Html<&'static str> {
    Html(super::dashboard::dashboard_html())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Admin token auth middleware: accepts the `x-admin-token` header,
/// `Authorization: Bearer <token>`, or `?token=`.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(expected) = &state.admin_token else {
        return next.run(req).await;
    };

    let headers = req.headers();
    let from_header = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });
    if from_header.is_some_and(|t| t.trim() == expected) {
        return next.run(req).await;
    }

    let query_token = Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token);
    if query_token.is_some_and(|t| t == *expected) {
        return next.run(req).await;
    }

    tracing::debug!("Rejected unauthenticated request to {}", req.uri().path());
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"ok": false, "error": "Unauthorized"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Protected routes: require the admin token when one is configured
    let protected = Router::new()
        .route("/api/status", get(super::routes::status))
        .route(
            "/api/config",
            get(super::routes::get_config).post(super::routes::update_config),
        )
        .route("/api/logs", get(super::routes::tail_logs))
        .route("/api/run", post(super::routes::run_now))
        .route("/api/run/async", post(super::routes::run_async))
        .route(
            "/api/accounts",
            get(super::routes::list_accounts).post(super::routes::add_account),
        )
        .route("/api/accounts/{id}", delete(super::routes::delete_account))
        .route("/api/runs", get(super::routes::list_runs))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_admin,
        ));

    // Public routes: no auth
    let public = Router::new()
        .route("/", get(dashboard_page))
        .route("/health", get(super::routes::health_check));

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server; returns when Ctrl-C is received.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = {
        let cfg = state
            .config
            .lock()
            .map_err(|e| anyhow::anyhow!("config lock poisoned: {e}"))?;
        format!("{}:{}", cfg.gateway.host, cfg.gateway.port)
    };
    if state.admin_token.is_none() {
        tracing::warn!("⚠️ No admin token configured, /api/* is open to anyone who can reach {addr}");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Control panel listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("👋 Shutting down control panel");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use leafcheck_core::error::{LeafcheckError, Result};
    use leafcheck_core::traits::{SiteAdapter, SiteSession};
    use leafcheck_core::types::Account;
    use leafcheck_runner::{AccountRunner, RunnerSettings};
    use serde_json::Value;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    /// Fails every session; optionally waits for a release signal first.
    struct NoBrowser {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SiteAdapter for NoBrowser {
        fn name(&self) -> &str {
            "none"
        }

        async fn open_session(&self) -> Result<Box<dyn SiteSession>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Err(LeafcheckError::Browser("no browser in tests".into()))
        }
    }

    fn state(dir: &Path, token: &str, gate: Option<Arc<Notify>>) -> AppState {
        let mut config = AppConfig::default();
        config.gateway.admin_token = token.into();
        config.storage.log_dir = dir.display().to_string();

        let db = Arc::new(CheckinDb::open(Path::new(":memory:")).unwrap());
        let runner = AccountRunner::new(Arc::new(NoBrowser { gate }), RunnerSettings::default());
        let orchestrator =
            Arc::new(BatchOrchestrator::new(runner, Duration::ZERO).with_sink(db.clone()));
        AppState::new(config, dir.join("leafcheck.toml"), db, orchestrator)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("x-admin-token", "s3cret")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "s3cret", None));

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler"], false);

        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "s3cret", None));

        let (status, _) = send(&app, get("/api/status")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get("/api/status?token=wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, get("/api/status?token=s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);

        let req = Request::get("/api/status")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);

        let req = Request::get("/api/status")
            .header("x-admin-token", "s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_token_is_percent_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "p+ss&w rd", None));

        let (status, _) = send(&app, get("/api/status?token=p%2Bss%26w%20rd")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, get("/api/status?limit=5&token=p%2Bss%26w+rd")).await;
        assert_eq!(status, StatusCode::OK);

        // Raw reserved characters split or change the value.
        let (status, _) = send(&app, get("/api/status?token=p+ss&w%20rd")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_token_disables_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "", None));
        assert_eq!(send(&app, get("/api/accounts")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "s3cret", None));

        let (status, _) = send(
            &app,
            post_json("/api/accounts", serde_json::json!({"email": " ", "password": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            post_json(
                "/api/accounts",
                serde_json::json!({"email": "alice@example.com", "password": "hunter2"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["id"].as_i64().unwrap();

        let (_, body) = send(&app, get("/api/accounts?token=s3cret")).await;
        assert_eq!(body["items"][0]["email"], "alice@example.com");
        assert!(!body.to_string().contains("hunter2"));

        let req = Request::delete(format!("/api/accounts/{id}?token=s3cret"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);

        let req = Request::delete(format!("/api/accounts/{id}?token=s3cret"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_records_results() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "", None);
        state.db.add_account("alice@example.com", "pw").unwrap();
        let orchestrator = state.orchestrator.clone();
        let db = state.db.clone();
        let app = build_router(state);

        let (status, body) = send(&app, Request::post("/api/run").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["success"], 0);
        assert!(!orchestrator.is_running());

        assert_eq!(db.list_runs(10).unwrap().len(), 1);

        let (status, body) = send(&app, get("/api/runs?limit=0")).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["success"], false);
        assert_eq!(items[0]["balance"], "unknown");
    }

    #[tokio::test]
    async fn test_run_without_accounts_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "", None));

        let (status, _) = send(&app, Request::post("/api/run").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) =
            send(&app, Request::post("/api/run/async").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_while_running_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let state = state(dir.path(), "", Some(gate.clone()));
        state.db.add_account("alice@example.com", "pw").unwrap();
        let orchestrator = state.orchestrator.clone();
        let app = build_router(state);

        let busy = orchestrator.clone();
        let first = tokio::spawn(async move {
            busy.try_run(&[Account::new("bob@example.com", "pw")]).await
        });
        while !orchestrator.is_running() {
            tokio::task::yield_now().await;
        }

        let (status, body) = send(&app, Request::post("/api/run").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already running");
        let (status, _) =
            send(&app, Request::post("/api/run/async").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_config_update_persists_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "s3cret", None);
        let config_path = state.config_path.clone();
        let app = build_router(state);

        let (status, _) = send(
            &app,
            post_json(
                "/api/config",
                serde_json::json!({
                    "telegram_bot_token": "123456:SECRET",
                    "telegram_chat_id": "42",
                    "checkin_urls": "https://a.example, https://b.example",
                    "cron_hour": 3,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let saved = AppConfig::load_from(&config_path).unwrap();
        assert_eq!(saved.notify.telegram.bot_token, "123456:SECRET");
        assert_eq!(saved.site.checkin_urls.len(), 2);
        assert_eq!(saved.schedule.hour, 3);

        let (_, body) = send(&app, get("/api/config?token=s3cret")).await;
        assert_eq!(body["notify"]["telegram"]["bot_token"], "1234••••");

        // a masked value sent back is ignored
        send(
            &app,
            post_json("/api/config", serde_json::json!({"telegram_bot_token": "1234••••"})),
        )
        .await;
        let saved = AppConfig::load_from(&config_path).unwrap();
        assert_eq!(saved.notify.telegram.bot_token, "123456:SECRET");

        let (status, _) =
            send(&app, post_json("/api/config", serde_json::json!({"cron_minute": 75}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "", None));

        let (status, body) = send(&app, get("/api/logs")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["lines"].as_array().unwrap().is_empty());

        std::fs::write(dir.path().join("checkin.2026-10-17.log"), "yesterday\n").unwrap();
        let content: String = (0..150).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("checkin.2026-10-18.log"), content).unwrap();
        std::fs::write(dir.path().join("other.log"), "unrelated\n").unwrap();

        let (_, body) = send(&app, get("/api/logs")).await;
        let lines = body["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line 50");
        assert_eq!(lines[99], "line 149");
    }

    #[tokio::test]
    async fn test_logs_tail_of_large_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path(), "", None));

        let padding = "x".repeat(200);
        let content: String = (0..5000).map(|i| format!("line {i} {padding}\n")).collect();
        assert!(content.len() > 1_000_000);
        std::fs::write(dir.path().join("checkin.2026-10-18.log"), content).unwrap();

        let (status, body) = send(&app, get("/api/logs")).await;
        assert_eq!(status, StatusCode::OK);
        let lines = body["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], format!("line 4900 {padding}"));
        assert_eq!(lines[99], format!("line 4999 {padding}"));
    }

    #[tokio::test]
    async fn test_back_to_back_async_runs() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let state = state(dir.path(), "", Some(gate.clone()));
        state.db.add_account("alice@example.com", "pw").unwrap();
        let orchestrator = state.orchestrator.clone();
        let db = state.db.clone();
        let app = build_router(state);

        let run_async = || Request::post("/api/run/async").body(Body::empty()).unwrap();
        let (first, _) = send(&app, run_async()).await;
        let (second, body) = send(&app, run_async()).await;
        assert_eq!(first, StatusCode::ACCEPTED);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already running");
        assert!(orchestrator.is_running());

        gate.notify_one();
        while orchestrator.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(db.list_runs(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_config_update_keeps_env_values_out_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "s3cret", None);
        let config_path = state.config_path.clone();

        let mut file_layer = AppConfig::default();
        file_layer.schedule.hour = 7;
        file_layer.save_to(&config_path).unwrap();
        {
            let mut live = state.config.lock().unwrap();
            live.schedule.hour = 7;
            live.apply_env_from(|key| match key {
                "LEAFLOW_ACCOUNTS" => Some("alice@example.com:hunter2".into()),
                "LEAFLOW_COOKIE" => Some("session=from-env".into()),
                "TELEGRAM_BOT_TOKEN" => Some("999:ENVTOKEN".into()),
                _ => None,
            });
        }
        let live = state.config.clone();
        let app = build_router(state);

        let (status, _) = send(
            &app,
            post_json("/api/config", serde_json::json!({"telegram_chat_id": "99"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let raw = std::fs::read_to_string(&config_path).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("from-env"));
        assert!(!raw.contains("ENVTOKEN"));
        let saved = AppConfig::load_from(&config_path).unwrap();
        assert_eq!(saved.notify.telegram.chat_id, "99");
        assert_eq!(saved.schedule.hour, 7);
        assert!(saved.accounts.is_empty());

        let live = live.lock().unwrap();
        assert_eq!(live.notify.telegram.chat_id, "99");
        assert_eq!(live.notify.telegram.bot_token, "999:ENVTOKEN");
        assert_eq!(live.accounts.len(), 1);
    }
}
