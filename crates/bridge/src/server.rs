//! The HTTP surface: one router per upstream, mounted at the root
//! (single-upstream mode) or nested under `/<prefix><name>` (multiplex
//! mode). Handlers resolve tools against the supervisor's *current* catalog
//! at request time, so a reconnect-time catalog swap re-binds the surface
//! without touching the router.

use crate::executor::{CallFailure, execute_tool_call};
use crate::supervisor::{SessionProvider as _, Supervisor};
use axum::extract::{Path, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, body::Bytes};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub api_key: Option<String>,
    pub strict_auth: bool,
    pub path_prefix: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            strict_auth: false,
            path_prefix: "/".to_string(),
        }
    }
}

#[derive(Clone)]
struct UpstreamState {
    supervisor: Arc<Supervisor>,
}

#[derive(Clone)]
struct AuthState {
    key: Arc<str>,
    strict: bool,
}

/// Single-upstream mode: the upstream's endpoints live at the root.
pub fn single_app(supervisor: Arc<Supervisor>, options: &AppOptions) -> Router {
    apply_common(upstream_router(supervisor), options)
}

/// Multiplex mode: one child router per upstream under the path prefix,
/// each with its own supervisor and status record.
pub fn multi_app(supervisors: &[Arc<Supervisor>], options: &AppOptions) -> Router {
    let prefix = normalize_prefix(&options.path_prefix);
    let names: Vec<String> = supervisors.iter().map(|s| s.name().to_string()).collect();

    let root_health = move || {
        let names = names.clone();
        async move { Json(json!({"status": "ok", "servers": names})) }
    };

    let mut app = Router::new().route("/health", get(root_health));
    for supervisor in supervisors {
        let mount = format!("{prefix}{}", supervisor.name());
        app = app.nest(&mount, upstream_router(supervisor.clone()));
    }
    apply_common(app, options)
}

fn upstream_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/tools", get(list_tools))
        .route("/{tool}", post(call_tool))
        .with_state(UpstreamState { supervisor })
}

fn apply_common(mut app: Router, options: &AppOptions) -> Router {
    if let Some(key) = &options.api_key {
        let auth = AuthState {
            key: Arc::from(key.as_str()),
            strict: options.strict_auth,
        };
        app = app.layer(middleware::from_fn_with_state(auth, require_api_key));
    }
    app.layer(CorsLayer::permissive())
}

/// Bearer-token check. Tool calls (POSTs) always require the key; the
/// read-only surface stays open unless strict auth is on.
async fn require_api_key(State(auth): State<AuthState>, req: Request, next: Next) -> Response {
    let needs_auth = auth.strict || req.method() == Method::POST;
    if needs_auth {
        let authorized = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == &*auth.key);
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": {"message": "Invalid or missing API key"}})),
            )
                .into_response();
        }
    }
    next.run(req).await
}

async fn call_tool(
    State(state): State<UpstreamState>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Response {
    // Parameterless tools accept an empty body.
    let payload = if body.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                return failure_response(&CallFailure::BadPayload {
                    message: format!("invalid JSON body: {e}"),
                });
            }
        }
    };

    match execute_tool_call(state.supervisor.as_ref(), &tool, payload).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(failure) => failure_response(&failure),
    }
}

fn failure_response(failure: &CallFailure) -> Response {
    let (status, detail) = match failure {
        CallFailure::UnknownTool { tool } => (
            StatusCode::NOT_FOUND,
            json!({"message": format!("Unknown tool: {tool}")}),
        ),
        CallFailure::BadPayload { message } => {
            (StatusCode::BAD_REQUEST, json!({"message": message}))
        }
        CallFailure::SchemaViolation { message, errors } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"message": message, "errors": errors}),
        ),
        CallFailure::Unavailable { message } => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"message": "Upstream tool server is unavailable", "error": message}),
        ),
        CallFailure::ToolError { message, data } => {
            let mut detail = json!({"message": message});
            if let Some(data) = data {
                detail["data"] = data.clone();
            }
            (StatusCode::INTERNAL_SERVER_ERROR, detail)
        }
        CallFailure::Timeout { message } => (
            StatusCode::GATEWAY_TIMEOUT,
            json!({"message": "Tool call timed out", "error": message}),
        ),
        CallFailure::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"message": "Tool execution failed", "error": message}),
        ),
    };
    (status, Json(json!({"detail": detail}))).into_response()
}

/// On-demand health probe: runs a live `tools/list` against the current
/// session and reports the upstream's status record.
async fn health(State(state): State<UpstreamState>) -> Response {
    let supervisor = &state.supervisor;
    let (healthy, message) = supervisor.check_health().await;
    let snapshot = supervisor.status().snapshot();

    Json(json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "connection_name": supervisor.name(),
        "message": message,
        "details": {
            "error_count": snapshot.error_count,
            "last_error": snapshot.last_error,
            "last_check": snapshot.last_check,
            "check_type": "on_demand",
        }
    }))
    .into_response()
}

async fn metrics(State(state): State<UpstreamState>) -> Response {
    let supervisor = &state.supervisor;
    Json(json!({
        "connection": supervisor.status().snapshot(),
        "requests": supervisor.status().counters(),
        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
    }))
    .into_response()
}

async fn list_tools(State(state): State<UpstreamState>) -> Response {
    let catalog = state.supervisor.catalog();
    let tools: Vec<_> = catalog.descriptors().collect();
    Json(json!({"tools": tools})).into_response()
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}
