//! Upstream configuration: the JSON config file and the tuning knobs.
//!
//! The config file's top-level `mcpServers` object maps server names to
//! descriptors. A descriptor is either a stdio command (`command` + `args` +
//! `env`) or a remote endpoint (`url` + `headers`); the transport type can be
//! given explicitly via `type` or is inferred (`command` implies stdio, a bare
//! `url` implies SSE).

use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How the bridge reaches one upstream.
#[derive(Debug, Clone)]
pub enum TransportKind {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamablehttp",
        }
    }
}

/// Immutable descriptor for one upstream, fixed at config load.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub sse_read_timeout: Duration,
    /// Total `tools/call` attempts per HTTP request (1 = no retries; the
    /// escape hatch for non-idempotent tools).
    pub max_call_attempts: u32,
    /// Operator-supplied additions to the recoverable error signature list.
    pub extra_recoverable_errors: Vec<String>,
}

/// Global tuning defaults, overridable via the config file's `settings`
/// object.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub initial_connect_attempts: u32,
    pub initial_connect_base_delay: Duration,
    pub initial_connect_backoff_factor: f64,
    pub reconnect_max_attempts: u32,
    pub reconnect_min_interval: Duration,
    pub reconnect_error_threshold: u32,
    pub reconnect_open_attempts: u32,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub call_deadline_growth: Duration,
    pub max_call_attempts: u32,
    pub probe_timeout: Duration,
    pub sse_read_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            initial_connect_attempts: 3,
            initial_connect_base_delay: Duration::from_secs_f64(2.0),
            initial_connect_backoff_factor: 1.5,
            reconnect_max_attempts: 5,
            reconnect_min_interval: Duration::from_secs(30),
            reconnect_error_threshold: 3,
            reconnect_open_attempts: 3,
            connect_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            call_deadline_growth: Duration::from_secs(10),
            max_call_attempts: 4,
            probe_timeout: Duration::from_secs(5),
            sse_read_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// One entry under `mcpServers` as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    #[serde(default, rename = "type")]
    pub server_type: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sse_read_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_call_attempts: Option<u32>,
    #[serde(default)]
    pub extra_recoverable_errors: Vec<String>,
}

/// Overrides for [`RuntimeSettings`], all optional, all in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverrides {
    #[serde(default)]
    pub initial_connect_attempts: Option<u32>,
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    #[serde(default)]
    pub reconnect_min_interval_secs: Option<u64>,
    #[serde(default)]
    pub reconnect_error_threshold: Option<u32>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default)]
    pub call_deadline_growth_secs: Option<u64>,
    #[serde(default)]
    pub max_call_attempts: Option<u32>,
    #[serde(default)]
    pub sse_read_timeout_secs: Option<u64>,
    #[serde(default)]
    pub shutdown_grace_secs: Option<u64>,
}

impl SettingsOverrides {
    pub fn apply(&self, mut settings: RuntimeSettings) -> RuntimeSettings {
        if let Some(v) = self.initial_connect_attempts {
            settings.initial_connect_attempts = v;
        }
        if let Some(v) = self.reconnect_max_attempts {
            settings.reconnect_max_attempts = v;
        }
        if let Some(v) = self.reconnect_min_interval_secs {
            settings.reconnect_min_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.reconnect_error_threshold {
            settings.reconnect_error_threshold = v;
        }
        if let Some(v) = self.connect_timeout_secs {
            settings.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.call_timeout_secs {
            settings.call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.call_deadline_growth_secs {
            settings.call_deadline_growth = Duration::from_secs(v);
        }
        if let Some(v) = self.max_call_attempts {
            settings.max_call_attempts = v;
        }
        if let Some(v) = self.sse_read_timeout_secs {
            settings.sse_read_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.shutdown_grace_secs {
            settings.shutdown_grace = Duration::from_secs(v);
        }
        settings
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub mcp_servers: HashMap<String, ServerEntry>,
    #[serde(default)]
    pub settings: SettingsOverrides,
}

/// Full, resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub upstreams: Vec<UpstreamConfig>,
    pub settings: RuntimeSettings,
}

pub fn load_config_file(path: &Path) -> Result<BridgeConfig> {
    let bytes = std::fs::read(path)
        .map_err(|e| BridgeError::Config(format!("read {}: {e}", path.display())))?;
    let file: ConfigFile = serde_json::from_slice(&bytes)
        .map_err(|e| BridgeError::Config(format!("parse {}: {e}", path.display())))?;

    if file.mcp_servers.is_empty() {
        return Err(BridgeError::Config(format!(
            "no 'mcpServers' found in {}",
            path.display()
        )));
    }

    let settings = file.settings.apply(RuntimeSettings::default());
    let mut upstreams: Vec<UpstreamConfig> = file
        .mcp_servers
        .into_iter()
        .map(|(name, entry)| entry.into_upstream(name, &settings))
        .collect::<Result<_>>()?;
    // Deterministic startup and mount order regardless of map iteration.
    upstreams.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(BridgeConfig {
        upstreams,
        settings,
    })
}

impl ServerEntry {
    /// Resolve the entry into an [`UpstreamConfig`], inferring the transport
    /// type when it is not explicit.
    pub fn into_upstream(self, name: String, settings: &RuntimeSettings) -> Result<UpstreamConfig> {
        let transport = match self.server_type.as_deref() {
            Some("stdio") => {
                let command = self.command.ok_or_else(|| {
                    BridgeError::Config(format!("server '{name}': stdio requires 'command'"))
                })?;
                TransportKind::Stdio {
                    command,
                    args: self.args,
                    env: self.env,
                }
            }
            Some("sse") => TransportKind::Sse {
                url: require_url(&name, self.url)?,
                headers: self.headers,
            },
            Some("streamablehttp" | "streamable_http") => TransportKind::StreamableHttp {
                url: ensure_trailing_slash(require_url(&name, self.url)?),
                headers: self.headers,
            },
            Some(other) => {
                return Err(BridgeError::Config(format!(
                    "server '{name}': unknown type '{other}'"
                )));
            }
            None => {
                if let Some(command) = self.command {
                    TransportKind::Stdio {
                        command,
                        args: self.args,
                        env: self.env,
                    }
                } else if let Some(url) = self.url {
                    // Bare `url` keeps the historical SSE default.
                    TransportKind::Sse {
                        url,
                        headers: self.headers,
                    }
                } else {
                    return Err(BridgeError::Config(format!(
                        "server '{name}': needs either 'command' or 'url'"
                    )));
                }
            }
        };

        Ok(UpstreamConfig {
            name,
            transport,
            connect_timeout: self
                .connect_timeout_secs
                .map_or(settings.connect_timeout, Duration::from_secs),
            call_timeout: self
                .call_timeout_secs
                .map_or(settings.call_timeout, Duration::from_secs),
            sse_read_timeout: self
                .sse_read_timeout_secs
                .map_or(settings.sse_read_timeout, Duration::from_secs),
            max_call_attempts: self
                .max_call_attempts
                .unwrap_or(settings.max_call_attempts)
                .max(1),
            extra_recoverable_errors: self.extra_recoverable_errors,
        })
    }
}

fn require_url(name: &str, url: Option<String>) -> Result<String> {
    url.ok_or_else(|| BridgeError::Config(format!("server '{name}': missing 'url'")))
}

/// Streamable HTTP servers redirect on the bare path; normalize once at
/// config load so the first frame never hits a redirect.
pub fn ensure_trailing_slash(url: String) -> String {
    if url.ends_with('/') {
        url
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: serde_json::Value) -> ServerEntry {
        serde_json::from_value(json).expect("valid server entry")
    }

    #[test]
    fn infers_stdio_from_command() {
        let upstream = entry(serde_json::json!({"command": "server-bin", "args": ["--fast"]}))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .expect("resolve");
        assert!(matches!(
            upstream.transport,
            TransportKind::Stdio { ref command, .. } if command == "server-bin"
        ));
    }

    #[test]
    fn infers_sse_from_bare_url() {
        let upstream = entry(serde_json::json!({"url": "http://127.0.0.1:9000/sse"}))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .expect("resolve");
        assert!(matches!(upstream.transport, TransportKind::Sse { .. }));
    }

    #[test]
    fn streamable_http_accepts_both_spellings_and_normalizes_url() {
        for spelling in ["streamablehttp", "streamable_http"] {
            let upstream = entry(serde_json::json!({
                "type": spelling,
                "url": "http://127.0.0.1:9000/mcp"
            }))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .expect("resolve");
            let TransportKind::StreamableHttp { url, .. } = upstream.transport else {
                panic!("expected streamable http transport");
            };
            assert_eq!(url, "http://127.0.0.1:9000/mcp/");
        }
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        assert_eq!(
            ensure_trailing_slash("http://h/mcp/".into()),
            "http://h/mcp/"
        );
    }

    #[test]
    fn rejects_unknown_type_and_empty_entry() {
        let err = entry(serde_json::json!({"type": "websocket", "url": "http://h"}))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("unknown type"));

        let err = entry(serde_json::json!({}))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("'command' or 'url'"));
    }

    #[test]
    fn per_server_overrides_take_precedence() {
        let upstream = entry(serde_json::json!({
            "command": "server-bin",
            "callTimeoutSecs": 3,
            "maxCallAttempts": 1
        }))
        .into_upstream("s1".into(), &RuntimeSettings::default())
        .expect("resolve");
        assert_eq!(upstream.call_timeout, Duration::from_secs(3));
        assert_eq!(upstream.max_call_attempts, 1);
    }

    #[test]
    fn max_call_attempts_zero_is_clamped_to_one() {
        let upstream = entry(serde_json::json!({"command": "x", "maxCallAttempts": 0}))
            .into_upstream("s1".into(), &RuntimeSettings::default())
            .expect("resolve");
        assert_eq!(upstream.max_call_attempts, 1);
    }

    #[test]
    fn settings_overrides_apply() {
        let overrides: SettingsOverrides = serde_json::from_value(serde_json::json!({
            "callTimeoutSecs": 5,
            "reconnectMinIntervalSecs": 10,
            "maxCallAttempts": 2
        }))
        .expect("valid overrides");
        let settings = overrides.apply(RuntimeSettings::default());
        assert_eq!(settings.call_timeout, Duration::from_secs(5));
        assert_eq!(settings.reconnect_min_interval, Duration::from_secs(10));
        assert_eq!(settings.max_call_attempts, 2);
        // Untouched fields keep their defaults.
        assert_eq!(settings.reconnect_max_attempts, 5);
    }
}
