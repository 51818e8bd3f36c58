//! The session capability consumed by the supervisor and executor.
//!
//! `UpstreamSession` is the seam between the request pipeline and the wire
//! protocol: three operations, each bounded by a caller-supplied deadline.
//! The production implementation wraps an rmcp `RunningService`; tests
//! substitute scripted fakes.

use crate::error::{BridgeError, Result};
use crate::transport::McpService;
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, JsonObject, Tool};
use std::time::Duration;

#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Monotonic per-upstream generation; a swapped-in session always has a
    /// higher generation than the one it replaced.
    fn generation(&self) -> u64;

    /// Fetch the tool catalog. Cheap and idempotent; doubles as the
    /// liveness probe.
    async fn list_tools(&self, deadline: Duration) -> Result<Vec<Tool>>;

    /// Invoke a named tool with a JSON object argument.
    async fn call_tool(
        &self,
        name: &str,
        args: JsonObject,
        deadline: Duration,
    ) -> Result<CallToolResult>;

    /// Tear the session down, bounded by the grace window. Idempotent.
    async fn shutdown(&self, grace: Duration);
}

/// Production session backed by an rmcp client service.
pub struct McpSession {
    upstream: String,
    generation: u64,
    peer: rmcp::service::Peer<rmcp::RoleClient>,
    // Held only for teardown; calls go through the cloned peer so concurrent
    // requests never contend on this lock.
    service: tokio::sync::Mutex<Option<McpService>>,
}

impl McpSession {
    pub fn new(upstream: impl Into<String>, generation: u64, service: McpService) -> Self {
        let peer = service.peer().clone();
        Self {
            upstream: upstream.into(),
            generation,
            peer,
            service: tokio::sync::Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl UpstreamSession for McpSession {
    fn generation(&self) -> u64 {
        self.generation
    }

    async fn list_tools(&self, deadline: Duration) -> Result<Vec<Tool>> {
        match tokio::time::timeout(deadline, self.peer.list_tools(Default::default())).await {
            Ok(Ok(result)) => Ok(result.tools),
            Ok(Err(e)) => Err(BridgeError::transport(&self.upstream, e.to_string())),
            Err(_) => Err(BridgeError::timeout(
                deadline,
                format!("tools/list on '{}'", self.upstream),
            )),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        args: JsonObject,
        deadline: Duration,
    ) -> Result<CallToolResult> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: Some(args),
            task: None,
        };
        match tokio::time::timeout(deadline, self.peer.call_tool(params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(BridgeError::transport(&self.upstream, e.to_string())),
            Err(_) => Err(BridgeError::timeout(
                deadline,
                format!("tools/call '{name}' on '{}'", self.upstream),
            )),
        }
    }

    async fn shutdown(&self, grace: Duration) {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            if tokio::time::timeout(grace, service.cancel()).await.is_err() {
                tracing::warn!(
                    upstream = %self.upstream,
                    generation = self.generation,
                    "session did not shut down within the grace window"
                );
            }
        }
    }
}
