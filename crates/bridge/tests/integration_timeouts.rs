//! Deadline behavior against an upstream that accepts `tools/call` and
//! never responds.

mod common;

use common::{
    KillOnDrop, misbehaving_server_bin, pick_unused_port, spawn_bridge_with_config, wait_http_ok,
    write_config,
};
use serde_json::{Value, json};
use std::time::{Duration, Instant};

#[tokio::test]
async fn hung_tool_call_maps_to_504_and_records_a_timeout() -> anyhow::Result<()> {
    let config = write_config(&json!({
        "mcpServers": {
            "slow": {
                "command": misbehaving_server_bin(),
                "callTimeoutSecs": 1,
                "maxCallAttempts": 1
            }
        }
    }))?;

    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge_with_config(config.path(), port, &[])?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(15)).await?;

    let client = reqwest::Client::new();
    let started = Instant::now();
    let resp = client
        .post(format!("{base}/slow/hang"))
        .json(&json!({}))
        .timeout(Duration::from_secs(30))
        .send()
        .await?;
    assert_eq!(resp.status(), 504);
    // One attempt with a 1 s deadline; nowhere near the 30 s default.
    assert!(started.elapsed() < Duration::from_secs(15));

    let body: Value = resp.json().await?;
    assert_eq!(body["detail"]["message"], json!("Tool call timed out"));

    let metrics: Value = client
        .get(format!("{base}/slow/metrics"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(metrics["connection"]["state"], json!("error"));
    assert!(
        metrics["connection"]["last_error"]
            .as_str()
            .unwrap()
            .contains("timeout"),
        "metrics: {metrics}"
    );
    Ok(())
}

#[tokio::test]
async fn retries_reconnect_and_still_time_out_within_budget() -> anyhow::Result<()> {
    let config = write_config(&json!({
        "mcpServers": {
            "slow": {
                "command": misbehaving_server_bin(),
                "callTimeoutSecs": 1,
                "maxCallAttempts": 2
            }
        },
        "settings": { "callDeadlineGrowthSecs": 0 }
    }))?;

    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge_with_config(config.path(), port, &[])?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(15)).await?;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/slow/hang"))
        .json(&json!({}))
        .timeout(Duration::from_secs(60))
        .send()
        .await?;
    // Two attempts, one reconnect cycle in between, still a timeout.
    assert_eq!(resp.status(), 504);

    // The reconnect produced a fresh session, so the probe-backed health
    // check recovers even though the tool itself hangs.
    let health: Value = client
        .get(format!("{base}/slow/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], json!("healthy"));
    Ok(())
}
