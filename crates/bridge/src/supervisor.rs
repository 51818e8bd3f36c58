//! Per-upstream connection supervision.
//!
//! A [`Supervisor`] owns exactly one upstream: its current session, its
//! status record, and its frozen tool catalog. Session replacement happens
//! only under the per-upstream reconnect lock; readers load the current
//! session pointer lock-free-ish (a short RwLock read) and keep their own
//! `Arc` borrow for the duration of a call, so a superseded session drains
//! naturally.

use crate::config::{RuntimeSettings, UpstreamConfig};
use crate::error::{BridgeError, Result};
use crate::reconnect::{ErrorClass, ReconnectPolicy, classify};
use crate::session::{McpSession, UpstreamSession};
use crate::status::{ConnectionState, StatusCell};
use crate::transport;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rmcp::model::Tool;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A tool as discovered at handshake, frozen for the life of the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// A descriptor plus its compiled input validator. A schema the validator
/// cannot compile falls through to "any JSON object".
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub validator: Option<jsonschema::Validator>,
}

/// The exposed tool surface of one upstream at one point in time. Swapped
/// atomically as a whole on reconnect; never mutated in place.
pub struct ToolCatalog {
    tools: HashMap<String, Arc<RegisteredTool>>,
    ordered: Vec<Arc<RegisteredTool>>,
    hash: String,
}

impl ToolCatalog {
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            ordered: Vec::new(),
            hash: String::new(),
        }
    }

    pub fn build(upstream: &str, tools: &[Tool]) -> Self {
        let mut map: HashMap<String, Arc<RegisteredTool>> = HashMap::new();
        let mut descriptors = Vec::new();

        for tool in tools {
            let descriptor = ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.as_deref().map(str::to_string),
                input_schema: Value::Object(tool.input_schema.as_ref().clone()),
                output_schema: tool
                    .output_schema
                    .as_ref()
                    .map(|s| Value::Object(s.as_ref().clone())),
            };

            if map.contains_key(&descriptor.name) {
                tracing::warn!(
                    upstream = %upstream,
                    tool = %descriptor.name,
                    "duplicate tool name; skipping"
                );
                continue;
            }

            let validator = match jsonschema::validator_for(&descriptor.input_schema) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(
                        upstream = %upstream,
                        tool = %descriptor.name,
                        error = %e,
                        "input schema did not compile; accepting any JSON object"
                    );
                    None
                }
            };

            descriptors.push(descriptor.clone());
            map.insert(
                descriptor.name.clone(),
                Arc::new(RegisteredTool {
                    descriptor,
                    validator,
                }),
            );
        }

        let hash = catalog_hash(&descriptors);
        let mut ordered: Vec<Arc<RegisteredTool>> = map.values().cloned().collect();
        ordered.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));

        Self {
            tools: map,
            ordered,
            hash,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.ordered.iter().map(|t| &t.descriptor)
    }
}

/// Canonical-JSON SHA-256 over the sorted descriptor list; used to detect
/// catalog drift across reconnects.
fn catalog_hash(descriptors: &[ToolDescriptor]) -> String {
    let mut entries: Vec<&ToolDescriptor> = descriptors.iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let v = Value::Array(
        entries
            .into_iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description.as_deref().unwrap_or_default(),
                    "inputSchema": canonicalize_json(&d.input_schema),
                    "outputSchema": d.output_schema.as_ref().map_or(Value::Null, |s| canonicalize_json(s)),
                })
            })
            .collect(),
    );

    let serialized = serde_json::to_string(&canonicalize_json(&v)).expect("valid json");
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

fn canonicalize_json(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                if let Some(val) = map.get(&k) {
                    out.insert(k, canonicalize_json(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Per-call budget handed to the executor.
#[derive(Debug, Clone, Copy)]
pub struct CallLimits {
    /// Total attempts (1 initial + retries).
    pub attempts: u32,
    pub base_timeout: Duration,
    /// Added to the deadline per retry attempt.
    pub deadline_growth: Duration,
}

/// The seam the request executor runs against; implemented by [`Supervisor`]
/// in production and by scripted fakes in tests.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn upstream_name(&self) -> &str;
    fn status(&self) -> &StatusCell;
    fn catalog(&self) -> Arc<ToolCatalog>;
    fn call_limits(&self) -> CallLimits;
    fn extra_recoverable_errors(&self) -> &[String];

    /// Probe the current session and hand it out; on probe failure, run at
    /// most one reconnect cycle before giving up.
    async fn healthy_session(&self) -> Option<Arc<dyn UpstreamSession>>;

    fn should_reconnect(&self, class: ErrorClass) -> bool;

    /// Rebuild the session under the upstream's reconnect lock.
    async fn reconnect(&self) -> Result<()>;
}

pub struct Supervisor {
    config: UpstreamConfig,
    settings: RuntimeSettings,
    policy: ReconnectPolicy,
    status: StatusCell,
    current: RwLock<Option<Arc<McpSession>>>,
    catalog: RwLock<Arc<ToolCatalog>>,
    reconnect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(config: UpstreamConfig, settings: RuntimeSettings) -> Arc<Self> {
        let policy = ReconnectPolicy {
            min_interval: settings.reconnect_min_interval,
            max_attempts: settings.reconnect_max_attempts,
            error_threshold: settings.reconnect_error_threshold,
        };
        Arc::new(Self {
            status: StatusCell::new(config.name.clone()),
            policy,
            config,
            settings,
            current: RwLock::new(None),
            catalog: RwLock::new(Arc::new(ToolCatalog::empty())),
            reconnect_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn current_session(&self) -> Option<Arc<McpSession>> {
        self.current.read().clone()
    }

    /// Initial connect with bounded retry (base delay grows by the backoff
    /// factor each attempt). On exhaustion the supervisor stays in `Error`;
    /// whether the process continues is the orchestrator's call.
    pub async fn start(&self) -> Result<()> {
        let attempts = self.settings.initial_connect_attempts.max(1);
        let mut delay = self.settings.initial_connect_base_delay;
        let mut last_error: Option<BridgeError> = None;

        for attempt in 1..=attempts {
            tracing::info!(
                upstream = %self.config.name,
                attempt,
                max_attempts = attempts,
                "connecting"
            );
            match self.open_session().await {
                Ok((session, tools)) => {
                    self.install(session, tools);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        upstream = %self.config.name,
                        attempt,
                        error = %e,
                        "connect attempt failed"
                    );
                    self.status.record_error(&e.to_string());
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.mul_f64(self.settings.initial_connect_backoff_factor);
                    }
                }
            }
        }

        let cause = last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string());
        Err(BridgeError::Startup(format!(
            "upstream '{}' failed its initial connect: {cause}",
            self.config.name
        )))
    }

    /// Open a fresh channel and enumerate tools; does not touch shared state.
    async fn open_session(&self) -> Result<(Arc<McpSession>, Vec<Tool>)> {
        let service = transport::connect(&self.config).await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(McpSession::new(&self.config.name, generation, service));
        let tools = session.list_tools(self.config.connect_timeout).await?;
        tracing::info!(
            upstream = %self.config.name,
            generation,
            tool_count = tools.len(),
            "enumerated tools"
        );
        Ok((session, tools))
    }

    /// Publish a session and its catalog as current. The superseded session
    /// (if any) is drained in the background, bounded by the grace window.
    fn install(&self, session: Arc<McpSession>, tools: Vec<Tool>) {
        let catalog = Arc::new(ToolCatalog::build(&self.config.name, &tools));
        {
            let mut slot = self.catalog.write();
            if !slot.hash().is_empty() && slot.hash() != catalog.hash() {
                tracing::warn!(
                    upstream = %self.config.name,
                    previous_tools = slot.len(),
                    current_tools = catalog.len(),
                    "tool catalog changed across reconnect; endpoints re-bound"
                );
            }
            *slot = catalog;
        }

        let old = self.current.write().replace(session);
        self.status.record_success();

        if let Some(old) = old {
            let grace = self.settings.shutdown_grace;
            let name = self.config.name.clone();
            tokio::spawn(async move {
                // Give in-flight borrowers the grace window before teardown.
                tokio::time::sleep(grace).await;
                tracing::debug!(upstream = %name, generation = old.generation(), "draining superseded session");
                old.shutdown(grace).await;
            });
        }
    }

    /// On-demand probe for the `/health` endpoint. Returns whether the probe
    /// passed and a human-readable message.
    pub async fn check_health(&self) -> (bool, String) {
        match self.current_session() {
            Some(session) => match session.list_tools(self.settings.probe_timeout).await {
                Ok(tools) => {
                    self.status.record_success();
                    (true, format!("upstream reachable ({} tools)", tools.len()))
                }
                Err(e) => {
                    let message = e.to_string();
                    self.status.record_error(&message);
                    (false, message)
                }
            },
            None => (false, "no live session".to_string()),
        }
    }

    /// Cancel the current session with a bounded grace window.
    pub async fn stop(&self) {
        let session = self.current.write().take();
        if let Some(session) = session {
            session.shutdown(self.settings.shutdown_grace).await;
        }
        tracing::info!(upstream = %self.config.name, "supervisor stopped");
    }
}

#[async_trait]
impl SessionProvider for Supervisor {
    fn upstream_name(&self) -> &str {
        &self.config.name
    }

    fn status(&self) -> &StatusCell {
        &self.status
    }

    fn catalog(&self) -> Arc<ToolCatalog> {
        self.catalog.read().clone()
    }

    fn call_limits(&self) -> CallLimits {
        CallLimits {
            attempts: self.config.max_call_attempts,
            base_timeout: self.config.call_timeout,
            deadline_growth: self.settings.call_deadline_growth,
        }
    }

    fn extra_recoverable_errors(&self) -> &[String] {
        &self.config.extra_recoverable_errors
    }

    async fn healthy_session(&self) -> Option<Arc<dyn UpstreamSession>> {
        if let Some(session) = self.current_session() {
            match session.list_tools(self.settings.probe_timeout).await {
                Ok(_) => {
                    self.status.record_success();
                    return Some(session as Arc<dyn UpstreamSession>);
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        upstream = %self.config.name,
                        error = %message,
                        "session probe failed"
                    );
                    self.status.record_error(&message);
                    let class = classify(&message, &self.config.extra_recoverable_errors);
                    if self.should_reconnect(class) && self.reconnect().await.is_ok() {
                        return self
                            .current_session()
                            .map(|s| s as Arc<dyn UpstreamSession>);
                    }
                    return None;
                }
            }
        }

        // No session at all (failed startup or stopped); absence of a
        // channel is treated as critical so recovery is not gated on the
        // error-count threshold.
        if self.should_reconnect(ErrorClass::Critical) && self.reconnect().await.is_ok() {
            return self
                .current_session()
                .map(|s| s as Arc<dyn UpstreamSession>);
        }
        None
    }

    fn should_reconnect(&self, class: ErrorClass) -> bool {
        self.policy
            .should_reconnect(&self.status.snapshot(), class, Utc::now())
    }

    async fn reconnect(&self) -> Result<()> {
        let _guard = self.reconnect_lock.lock().await;

        // Another caller may have restored the session while we waited.
        if self.status.snapshot().state == ConnectionState::Healthy
            && self.current_session().is_some()
        {
            return Ok(());
        }

        self.status.begin_reconnect();
        tracing::info!(upstream = %self.config.name, "reconnecting");

        let mut last_error: Option<BridgeError> = None;
        for attempt in 0..self.settings.reconnect_open_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(ReconnectPolicy::open_backoff(attempt - 1)).await;
            }
            match self.open_session().await {
                Ok((session, tools)) => {
                    self.install(session, tools);
                    tracing::info!(upstream = %self.config.name, "reconnected");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        upstream = %self.config.name,
                        attempt = attempt + 1,
                        error = %e,
                        "reconnect transport open failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let err =
            last_error.unwrap_or_else(|| BridgeError::Unavailable(self.config.name.clone()));
        self.status.record_error(&format!("reconnect failed: {err}"));
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::JsonObject;

    fn tool(name: &str, schema: Value) -> Tool {
        let object: JsonObject = serde_json::from_value(schema).expect("schema is an object");
        Tool::new(name.to_string(), "", Arc::new(object))
    }

    fn add_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
            "required": ["a", "b"]
        })
    }

    #[test]
    fn catalog_indexes_tools_by_name() {
        let catalog = ToolCatalog::build(
            "s1",
            &[tool("add", add_schema()), tool("ping", serde_json::json!({"type": "object"}))],
        );
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("add").is_some());
        assert!(catalog.get("missing").is_none());

        let names: Vec<&str> = catalog.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["add", "ping"]);
    }

    #[test]
    fn catalog_skips_duplicate_names() {
        let catalog = ToolCatalog::build(
            "s1",
            &[tool("add", add_schema()), tool("add", add_schema())],
        );
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn catalog_hash_is_stable_across_key_order() {
        let a = ToolCatalog::build(
            "s1",
            &[tool(
                "t",
                serde_json::json!({"type": "object", "properties": {"x": {}, "y": {}}}),
            )],
        );
        let b = ToolCatalog::build(
            "s1",
            &[tool(
                "t",
                serde_json::json!({"properties": {"y": {}, "x": {}}, "type": "object"}),
            )],
        );
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn catalog_hash_detects_drift() {
        let before = ToolCatalog::build("s1", &[tool("add", add_schema())]);
        let after = ToolCatalog::build(
            "s1",
            &[tool("add", serde_json::json!({"type": "object"}))],
        );
        assert_ne!(before.hash(), after.hash());

        let vanished = ToolCatalog::build("s1", &[]);
        assert_ne!(before.hash(), vanished.hash());
    }

    #[test]
    fn validator_resolves_local_defs_anyof_and_type_unions() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "target": { "$ref": "#/$defs/target" },
                "count": { "anyOf": [{ "type": "integer" }, { "type": "null" }] },
                "label": { "type": ["string", "number"] }
            },
            "required": ["target"],
            "$defs": {
                "target": {
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }
            }
        });
        let catalog = ToolCatalog::build("s1", &[tool("move", schema)]);
        let registered = catalog.get("move").expect("registered");
        let validator = registered.validator.as_ref().expect("compiled");

        assert!(
            validator
                .validate(&serde_json::json!({
                    "target": {"path": "/tmp/x"},
                    "count": null,
                    "label": 3
                }))
                .is_ok()
        );
        assert!(
            validator
                .validate(&serde_json::json!({"target": {"path": 7}}))
                .is_err()
        );
        assert!(
            validator
                .validate(&serde_json::json!({"count": 1}))
                .is_err(),
            "missing required $ref'd property must fail"
        );
    }

    #[test]
    fn compiled_validator_accepts_and_rejects() {
        let catalog = ToolCatalog::build("s1", &[tool("add", add_schema())]);
        let registered = catalog.get("add").expect("registered");
        let validator = registered.validator.as_ref().expect("compiled");

        assert!(validator.validate(&serde_json::json!({"a": 2, "b": 3})).is_ok());
        assert!(validator.validate(&serde_json::json!({"a": "two"})).is_err());
    }
}
