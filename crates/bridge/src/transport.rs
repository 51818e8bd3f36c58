//! Transport adapters: open a live MCP client over stdio, SSE, or
//! streamable HTTP.
//!
//! All three reduce to the same output, a `RunningService` whose handshake
//! (`initialize` + `notifications/initialized`) has already completed.
//! Dropping or cancelling the service releases the channel on every exit
//! path: the child process is reaped, HTTP streams are closed.

use crate::config::{TransportKind, UpstreamConfig};
use crate::error::{BridgeError, Result};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{
    ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
};
use rmcp::{RoleClient, ServiceExt, service::RunningService};
use std::collections::HashMap;

pub type McpService = RunningService<RoleClient, ()>;

/// Open a channel to the upstream and complete the protocol handshake,
/// bounded by the upstream's connect timeout.
pub async fn connect(config: &UpstreamConfig) -> Result<McpService> {
    let service = match &config.transport {
        TransportKind::Stdio { command, args, env } => {
            connect_stdio(config, command, args, env).await?
        }
        TransportKind::Sse { url, headers } => connect_sse(config, url, headers).await?,
        TransportKind::StreamableHttp { url, headers } => {
            connect_streamable_http(config, url, headers).await?
        }
    };

    // The handshake already ran inside serve(); keep the advertised
    // server info with the connection record.
    tracing::info!(
        upstream = %config.name,
        transport = config.transport.label(),
        server_info = ?service.peer_info(),
        "connected"
    );
    Ok(service)
}

async fn connect_stdio(
    config: &UpstreamConfig,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<McpService> {
    // The child inherits the bridge's environment with the configured
    // variables overlaid; stderr passes through for diagnostics.
    let transport = TokioChildProcess::new(tokio::process::Command::new(command).configure(
        |cmd| {
            cmd.args(args)
                .envs(env.iter())
                .stderr(std::process::Stdio::inherit());
        },
    ))
    .map_err(|e| BridgeError::transport(&config.name, format!("spawn '{command}': {e}")))?;

    match tokio::time::timeout(config.connect_timeout, ().serve(transport)).await {
        Ok(Ok(service)) => Ok(service),
        Ok(Err(e)) => Err(BridgeError::handshake(&config.name, e.to_string())),
        Err(_) => Err(connect_deadline_error(config)),
    }
}

async fn connect_sse(
    config: &UpstreamConfig,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<McpService> {
    // Idle-read timeout: an SSE stream that stays silent past the window is
    // treated as dead and the channel closes.
    let http = reqwest::Client::builder()
        .default_headers(build_header_map(&config.name, headers))
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.sse_read_timeout)
        .build()
        .map_err(|e| BridgeError::transport(&config.name, format!("build http client: {e}")))?;

    let transport = SseClientTransport::start_with_client(
        http,
        SseClientConfig {
            sse_endpoint: url.to_string().into(),
            ..Default::default()
        },
    )
    .await
    .map_err(|e| BridgeError::transport(&config.name, format!("open sse stream: {e}")))?;

    match tokio::time::timeout(config.connect_timeout, ().serve(transport)).await {
        Ok(Ok(service)) => Ok(service),
        Ok(Err(e)) => Err(BridgeError::handshake(&config.name, e.to_string())),
        Err(_) => Err(connect_deadline_error(config)),
    }
}

async fn connect_streamable_http(
    config: &UpstreamConfig,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<McpService> {
    // No global read timeout here: the response stream is long-lived.
    let http = reqwest::Client::builder()
        .default_headers(build_header_map(&config.name, headers))
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|e| BridgeError::transport(&config.name, format!("build http client: {e}")))?;

    let transport = StreamableHttpClientTransport::with_client(
        http,
        StreamableHttpClientTransportConfig::with_uri(url.to_string()),
    );

    match tokio::time::timeout(config.connect_timeout, ().serve(transport)).await {
        Ok(Ok(service)) => Ok(service),
        Ok(Err(e)) => Err(BridgeError::handshake(&config.name, e.to_string())),
        Err(_) => Err(connect_deadline_error(config)),
    }
}

fn connect_deadline_error(config: &UpstreamConfig) -> BridgeError {
    BridgeError::timeout(
        config.connect_timeout,
        format!("connect to '{}'", config.name),
    )
}

fn build_header_map(
    upstream: &str,
    headers: &HashMap<String, String>,
) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderName, HeaderValue};
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        } else {
            tracing::warn!(upstream = %upstream, header = %key, "skipping invalid header");
        }
    }
    map
}
