//! Gangway: a protocol-bridging reverse proxy for MCP tool servers.
//!
//! The bridge fronts one or more upstream MCP servers (stdio child
//! processes, SSE, or streamable HTTP) and re-exports every discovered tool
//! as a `POST /<tool>` JSON endpoint. Between the HTTP surface and the wire
//! sits the part that earns its keep: per-upstream session supervision,
//! throttled reconnection with an atomic session swap, and a request
//! executor that classifies failures and retries against a fresh session
//! when that is safe.

pub mod config;
pub mod error;
pub mod executor;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod status;
pub mod supervisor;
pub mod transport;

pub use config::{BridgeConfig, RuntimeSettings, UpstreamConfig};
pub use error::{BridgeError, Result};
