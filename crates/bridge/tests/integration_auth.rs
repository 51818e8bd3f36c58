//! Bearer-token middleware: tool calls require the key, the read-only
//! surface stays open unless strict auth is on.

mod common;

use common::{KillOnDrop, pick_unused_port, spawn_bridge, stdio_server_bin, wait_http_ok};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn tool_calls_require_the_api_key() -> anyhow::Result<()> {
    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge(
        &["--api-key", "sesame", "--", stdio_server_bin()],
        port,
    )?);
    let base = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(15)).await?;

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/add"))
        .json(&json!({"a": 1, "b": 2}))
        .send()
        .await?;
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/add"))
        .bearer_auth("wrong")
        .json(&json!({"a": 1, "b": 2}))
        .send()
        .await?;
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/add"))
        .bearer_auth("sesame")
        .json(&json!({"a": 1, "b": 2}))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    // Reads stay open without the key.
    let resp = client.get(format!("{base}/health")).send().await?;
    assert_eq!(resp.status(), 200);
    Ok(())
}

#[tokio::test]
async fn strict_auth_covers_the_whole_surface() -> anyhow::Result<()> {
    let port = pick_unused_port()?;
    let _bridge = KillOnDrop(spawn_bridge(
        &[
            "--api-key",
            "sesame",
            "--strict-auth",
            "--",
            stdio_server_bin(),
        ],
        port,
    )?);
    let base = format!("http://127.0.0.1:{port}");

    // Under strict auth even the readiness poll needs the key.
    let client = reqwest::Client::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        match client
            .get(format!("{base}/health"))
            .bearer_auth("sesame")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => break,
            _ if std::time::Instant::now() > deadline => {
                anyhow::bail!("bridge did not come up");
            }
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }

    let resp = client.get(format!("{base}/health")).send().await?;
    assert_eq!(resp.status(), 401);

    let resp = client.get(format!("{base}/tools")).send().await?;
    assert_eq!(resp.status(), 401);
    Ok(())
}
