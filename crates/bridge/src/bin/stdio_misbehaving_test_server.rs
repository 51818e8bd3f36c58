//! Stdio MCP server that connects and enumerates cleanly but never answers
//! `tools/call` for its `hang` tool. Used to exercise the bridge's per-call
//! deadline and retry budget in integration tests.

use serde_json::json;
use std::io::{BufRead as _, Write};

fn main() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if let Some(resp) = handle_message(&msg) {
            writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn handle_message(msg: &serde_json::Value) -> Option<serde_json::Value> {
    let method = msg.get("method").and_then(serde_json::Value::as_str)?;
    let id = msg.get("id")?.clone();

    match method {
        "initialize" => {
            let protocol_version = msg
                .get("params")
                .and_then(|p| p.get("protocolVersion"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("2024-11-05");
            Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": protocol_version,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "bridge-misbehaving-test-server", "version": "0" }
                }
            }))
        }
        "tools/list" => Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [{
                    "name": "hang",
                    "description": "Accepts the call and never responds",
                    "inputSchema": { "type": "object" }
                }]
            }
        })),
        // The whole point: swallow the call, never reply.
        "tools/call" => None,
        _ => Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "method not found" }
        })),
    }
}
