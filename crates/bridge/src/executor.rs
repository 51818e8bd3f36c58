//! The request executor: one HTTP call in, one (or a few retried)
//! `tools/call` out.
//!
//! Per call: bind the payload against the tool's input schema, obtain a
//! healthy session, invoke with a growing deadline, classify failures, and
//! retry against a freshly reconnected session when that is safe. Tool-level
//! failures (`is_error`) are never retried; only transport-level trouble is.

use crate::reconnect::{ErrorClass, ReconnectPolicy, classify};
use crate::status::ConnectionState;
use crate::supervisor::{RegisteredTool, SessionProvider};
use rmcp::model::{CallToolResult, JsonObject, RawContent};
use serde_json::Value;

/// Everything that can go wrong on the request path, keyed to an HTTP
/// status by the server layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// 404 — no such tool in the current catalog.
    UnknownTool { tool: String },
    /// 400 — body is not JSON at all.
    BadPayload { message: String },
    /// 422 — body does not match the tool's input schema.
    SchemaViolation { message: String, errors: Vec<String> },
    /// 503 — no healthy session / recoverable budget exhausted.
    Unavailable { message: String },
    /// 500 — the upstream tool ran and reported failure.
    ToolError { message: String, data: Option<Value> },
    /// 504 — the per-call deadline elapsed on every attempt.
    Timeout { message: String },
    /// 500 — unrecoverable transport/protocol failure.
    Internal { message: String },
}

pub async fn execute_tool_call(
    provider: &dyn SessionProvider,
    tool_name: &str,
    payload: Value,
) -> Result<Value, CallFailure> {
    let status = provider.status();
    status.count_request();

    let catalog = provider.catalog();
    let Some(tool) = catalog.get(tool_name) else {
        // A dead upstream exposes an empty catalog; report that as
        // unavailability rather than a missing tool.
        let failure = if catalog.is_empty() && status.snapshot().state != ConnectionState::Healthy
        {
            CallFailure::Unavailable {
                message: format!("upstream '{}' is unavailable", provider.upstream_name()),
            }
        } else {
            CallFailure::UnknownTool {
                tool: tool_name.to_string(),
            }
        };
        status.count_failure();
        return Err(failure);
    };

    let args = match bind_arguments(&tool, payload) {
        Ok(args) => args,
        Err(failure) => {
            status.count_failure();
            return Err(failure);
        }
    };

    let limits = provider.call_limits();
    let attempts = limits.attempts.max(1);
    let mut final_failure = CallFailure::Unavailable {
        message: format!("upstream '{}' is unavailable", provider.upstream_name()),
    };

    for attempt in 0..attempts {
        let Some(session) = provider.healthy_session().await else {
            status.count_failure();
            return Err(CallFailure::Unavailable {
                message: format!(
                    "no healthy session for upstream '{}'",
                    provider.upstream_name()
                ),
            });
        };

        let deadline = limits.base_timeout + limits.deadline_growth * attempt;
        tracing::debug!(
            upstream = %provider.upstream_name(),
            tool = %tool.descriptor.name,
            attempt = attempt + 1,
            attempts,
            generation = session.generation(),
            "calling tool"
        );

        match session
            .call_tool(&tool.descriptor.name, args.clone(), deadline)
            .await
        {
            Ok(result) => {
                if result.is_error.unwrap_or(false) {
                    // Upstream tool failure, not transport failure: surface
                    // it, never retry.
                    let (message, data) = tool_error_detail(&result);
                    status.record_error(&message);
                    status.count_failure();
                    return Err(CallFailure::ToolError { message, data });
                }
                status.record_success();
                status.count_success();
                return Ok(normalize_result(&result));
            }
            Err(e) => {
                let timed_out = e.is_timeout();
                let message = e.to_string();
                status.record_error(&message);

                let class = if timed_out {
                    ErrorClass::Critical
                } else {
                    classify(&message, provider.extra_recoverable_errors())
                };
                if !class.is_recoverable() {
                    status.count_failure();
                    return Err(CallFailure::Internal { message });
                }

                tracing::warn!(
                    upstream = %provider.upstream_name(),
                    tool = %tool.descriptor.name,
                    attempt = attempt + 1,
                    attempts,
                    error = %message,
                    "tool call attempt failed"
                );

                final_failure = if timed_out {
                    CallFailure::Timeout { message }
                } else {
                    CallFailure::Unavailable { message }
                };

                if attempt + 1 < attempts {
                    if provider.should_reconnect(class) {
                        let _ = provider.reconnect().await;
                    }
                    tokio::time::sleep(ReconnectPolicy::open_backoff(attempt)).await;
                }
            }
        }
    }

    status.count_failure();
    Err(final_failure)
}

/// Validate the request body against the tool's compiled input schema. The
/// validated object is handed to the upstream unchanged: no field drops, no
/// coercion.
fn bind_arguments(tool: &RegisteredTool, payload: Value) -> Result<JsonObject, CallFailure> {
    if !payload.is_object() {
        return Err(CallFailure::SchemaViolation {
            message: "request body must be a JSON object".to_string(),
            errors: Vec::new(),
        });
    }

    if let Some(validator) = &tool.validator {
        let errors: Vec<String> = validator
            .iter_errors(&payload)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(CallFailure::SchemaViolation {
                message: format!("arguments do not match the '{}' input schema", tool.descriptor.name),
                errors,
            });
        }
    }

    match payload {
        Value::Object(map) => Ok(map),
        _ => unreachable!("payload checked to be an object"),
    }
}

fn tool_error_detail(result: &CallToolResult) -> (String, Option<Value>) {
    let message = result
        .content
        .iter()
        .find_map(|item| match &item.raw {
            RawContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "Unknown tool execution error".to_string());

    // Some tools report structured failures as a JSON document in the text.
    let data = message
        .starts_with('{')
        .then(|| serde_json::from_str(&message).ok())
        .flatten();

    (message, data)
}

/// Normalize a successful result into the HTTP response body: the single
/// normalized item when there is exactly one, otherwise the array.
pub fn normalize_result(result: &CallToolResult) -> Value {
    let mut items: Vec<Value> = result.content.iter().map(normalize_item).collect();
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

fn normalize_item(item: &rmcp::model::Content) -> Value {
    match &item.raw {
        RawContent::Text(text) => match serde_json::from_str::<Value>(&text.text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text.text.clone()),
        },
        RawContent::Image(image) => Value::String(format!(
            "data:{};base64,{}",
            image.mime_type, image.data
        )),
        RawContent::Audio(audio) => Value::String(format!(
            "data:{};base64,{}",
            audio.mime_type, audio.data
        )),
        // Embedded resources and resource links pass through as an opaque
        // placeholder.
        _ => Value::String("Embedded resource not supported yet.".to_string()),
    }
}
