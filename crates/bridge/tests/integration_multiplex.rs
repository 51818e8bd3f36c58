//! Multi-upstream mounting and failure isolation: a healthy upstream keeps
//! serving while a dead one reports unavailable, with no cross-talk between
//! status records.

mod common;

use common::{
    KillOnDrop, pick_unused_port, spawn_bridge_with_config, stdio_server_bin, wait_http_ok,
    write_config,
};
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn healthy_and_dead_upstreams_stay_isolated() -> anyhow::Result<()> {
    let config = write_config(&json!({
        "mcpServers": {
            "alpha": { "command": stdio_server_bin() },
            "broken": { "command": "/nonexistent/definitely-not-a-server" }
        },
        "settings": { "initialConnectAttempts": 1 }
    }))?;

    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge_with_config(config.path(), port, &[])?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(20)).await?;

    let client = reqwest::Client::new();

    // The healthy upstream serves under its mount.
    let resp = client
        .post(format!("{base}/alpha/add"))
        .json(&json!({"a": 4, "b": 5}))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body, json!(9));

    // The dead upstream answers 503, not 404, for any tool call.
    let resp = client
        .post(format!("{base}/broken/ping"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 503);

    // Health verdicts are per upstream.
    let alpha: Value = client
        .get(format!("{base}/alpha/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(alpha["status"], json!("healthy"));
    assert_eq!(alpha["connection_name"], json!("alpha"));

    let broken: Value = client
        .get(format!("{base}/broken/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(broken["status"], json!("unhealthy"));
    assert_eq!(broken["connection_name"], json!("broken"));

    // The dead upstream's error count never leaks into the healthy one.
    let alpha_metrics: Value = client
        .get(format!("{base}/alpha/metrics"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(alpha_metrics["connection"]["error_count"], json!(0));

    let broken_metrics: Value = client
        .get(format!("{base}/broken/metrics"))
        .send()
        .await?
        .json()
        .await?;
    assert!(broken_metrics["connection"]["error_count"].as_u64().unwrap() >= 1);
    Ok(())
}

#[tokio::test]
async fn path_prefix_moves_the_mounts() -> anyhow::Result<()> {
    let config = write_config(&json!({
        "mcpServers": {
            "alpha": { "command": stdio_server_bin() }
        }
    }))?;

    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge_with_config(
        config.path(),
        port,
        &["--path-prefix", "/tools/"],
    )?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(15)).await?;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/tools/alpha/add"))
        .json(&json!({"a": 1, "b": 2}))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    Ok(())
}
