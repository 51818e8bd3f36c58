use anyhow::Context as _;
use std::process::{Child, Command};
use std::time::Duration;

pub use gangway_test_support::KillOnDrop;

pub fn pick_unused_port() -> anyhow::Result<u16> {
    gangway_test_support::pick_unused_port()
}

pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    gangway_test_support::wait_http_ok(url, timeout_dur).await
}

pub fn stdio_server_bin() -> &'static str {
    env!("CARGO_BIN_EXE_gangway-stdio-test-server")
}

pub fn misbehaving_server_bin() -> &'static str {
    env!("CARGO_BIN_EXE_gangway-stdio-misbehaving-test-server")
}

pub fn write_config(config: &serde_json::Value) -> anyhow::Result<tempfile::NamedTempFile> {
    let file = tempfile::NamedTempFile::new().context("create temp config")?;
    std::fs::write(file.path(), serde_json::to_vec_pretty(config)?)
        .context("write temp config")?;
    Ok(file)
}

pub fn spawn_bridge(args: &[&str], port: u16) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_gangway-bridge");
    // Flags go first: anything after a `--` separator in `args` is the
    // stdio command.
    Command::new(bin)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--log-level")
        .arg("info")
        .args(args)
        .spawn()
        .context("spawn bridge")
}

pub fn spawn_bridge_with_config(
    config_path: &std::path::Path,
    port: u16,
    extra_args: &[&str],
) -> anyhow::Result<Child> {
    let config = config_path.to_str().context("config path is not utf-8")?;
    let mut args = vec!["--config", config];
    args.extend_from_slice(extra_args);
    spawn_bridge(&args, port)
}
