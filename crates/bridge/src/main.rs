use anyhow::Context as _;
use clap::Parser;
use gangway_bridge::config::{BridgeConfig, RuntimeSettings, ServerEntry, load_config_file};
use gangway_bridge::server::{AppOptions, multi_app, single_app};
use gangway_bridge::supervisor::Supervisor;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "gangway-bridge",
    version,
    about = "Re-export MCP tool servers as a stable HTTP/JSON API"
)]
struct Cli {
    /// JSON config file whose `mcpServers` object maps server names to
    /// upstream descriptors.
    #[arg(long, conflicts_with_all = ["sse", "streamable_http", "command"])]
    config: Option<PathBuf>,

    /// Connect to a single SSE upstream at this URL.
    #[arg(long, conflicts_with_all = ["streamable_http", "command"])]
    sse: Option<String>,

    /// Connect to a single streamable HTTP upstream at this URL.
    #[arg(long = "streamable-http", conflicts_with = "command")]
    streamable_http: Option<String>,

    /// Extra header for a single remote upstream, as 'Name: value'.
    /// Repeatable.
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Bind address for the HTTP surface.
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Shared bearer token required on tool calls.
    #[arg(long, env = "GANGWAY_API_KEY")]
    api_key: Option<String>,

    /// Require the bearer token on the whole surface, reads included.
    #[arg(long)]
    strict_auth: bool,

    /// Mount prefix for multi-upstream mode.
    #[arg(long, default_value = "/")]
    path_prefix: String,

    /// Abort startup when any upstream fails its initial connect instead of
    /// serving it unhealthy.
    #[arg(long)]
    strict_startup: bool,

    /// Tracing filter, e.g. `info` or `gangway_bridge=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Command and arguments for a single stdio upstream (after `--`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let (config, single) = resolve_config(&cli)?;
    tracing::info!(
        bind = %cli.bind,
        upstreams = config.upstreams.len(),
        api_key = if cli.api_key.is_some() { "provided" } else { "not provided" },
        path_prefix = %cli.path_prefix,
        "starting gangway bridge"
    );

    // Supervisors start serially so configuration mistakes fail fast.
    let mut supervisors: Vec<Arc<Supervisor>> = Vec::new();
    for upstream in &config.upstreams {
        let supervisor = Supervisor::new(upstream.clone(), config.settings.clone());
        if let Err(e) = supervisor.start().await {
            if cli.strict_startup {
                return Err(anyhow::anyhow!(e).context("startup failed under --strict-startup"));
            }
            tracing::error!(
                upstream = %upstream.name,
                error = %e,
                "upstream failed to start; serving it unhealthy"
            );
        }
        supervisors.push(supervisor);
    }

    let options = AppOptions {
        api_key: cli.api_key.clone(),
        strict_auth: cli.strict_auth,
        path_prefix: cli.path_prefix.clone(),
    };
    let app = if single {
        single_app(supervisors[0].clone(), &options)
    } else {
        multi_app(&supervisors, &options)
    };

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("bind {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, "listening");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("http server")?;

    // Stop accepting happened above; now drain the supervisors together,
    // each bounded by its grace window.
    futures::future::join_all(supervisors.iter().map(|s| s.stop())).await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolve the CLI into upstream descriptors. Returns the config and
/// whether the single-upstream root mount applies.
fn resolve_config(cli: &Cli) -> anyhow::Result<(BridgeConfig, bool)> {
    if let Some(path) = &cli.config {
        let config = load_config_file(path)?;
        return Ok((config, false));
    }

    let settings = RuntimeSettings::default();
    let upstream = if let Some(url) = &cli.sse {
        single_remote_entry("sse", url, &cli.headers)?
            .into_upstream("sse".to_string(), &settings)?
    } else if let Some(url) = &cli.streamable_http {
        single_remote_entry("streamablehttp", url, &cli.headers)?
            .into_upstream("streamablehttp".to_string(), &settings)?
    } else if !cli.command.is_empty() {
        stdio_entry(&cli.command).into_upstream("stdio".to_string(), &settings)?
    } else {
        anyhow::bail!(
            "provide --config, --sse, --streamable-http, or a stdio command after `--`"
        );
    };

    Ok((
        BridgeConfig {
            upstreams: vec![upstream],
            settings,
        },
        true,
    ))
}

fn single_remote_entry(
    server_type: &str,
    url: &str,
    raw_headers: &[String],
) -> anyhow::Result<ServerEntry> {
    Ok(ServerEntry {
        server_type: Some(server_type.to_string()),
        url: Some(url.to_string()),
        headers: parse_cli_headers(raw_headers)?,
        ..Default::default()
    })
}

fn stdio_entry(command: &[String]) -> ServerEntry {
    ServerEntry {
        command: Some(command[0].clone()),
        args: command[1..].to_vec(),
        ..Default::default()
    }
}

fn parse_cli_headers(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .or_else(|| entry.split_once('='))
            .with_context(|| format!("invalid header '{entry}', expected 'Name: value'"))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}
