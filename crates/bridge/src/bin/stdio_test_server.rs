//! Minimal MCP stdio server used only for bridge integration tests.
//!
//! This intentionally does not depend on the bridge's production code
//! paths; it speaks JSON-RPC over stdio directly (one JSON message per
//! line) and exposes three tools: `add`, `div`, and `whoami`.

use serde_json::json;
use std::io::{BufRead as _, Write};
use std::time::{SystemTime, UNIX_EPOCH};

fn main() -> anyhow::Result<()> {
    let mut state = ServerState::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if let Some(resp) = handle_line(&mut state, &line) {
            write_json_line(&mut stdout, &resp)?;
        }
    }

    Ok(())
}

struct ServerState {
    instance_id: String,
    pid: u32,
    call_count: u64,
}

impl ServerState {
    fn new() -> Self {
        let pid = std::process::id();
        let started_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let instance_id = format!("{pid}-{started_ns}");
        Self {
            instance_id,
            pid,
            call_count: 0,
        }
    }
}

fn handle_line(state: &mut ServerState, line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let msg: serde_json::Value = serde_json::from_str(line).ok()?;
    handle_message(state, &msg)
}

fn handle_message(state: &mut ServerState, msg: &serde_json::Value) -> Option<serde_json::Value> {
    let method = msg.get("method").and_then(serde_json::Value::as_str)?;

    // Ignore notifications (no `id`).
    let id = msg.get("id")?.clone();

    match method {
        "initialize" => {
            let result = initialize_result(msg);
            Some(jsonrpc_ok(&id, &result))
        }
        "tools/list" => {
            let result = tools_list_result();
            Some(jsonrpc_ok(&id, &result))
        }
        "tools/call" => match tools_call_result(state, msg) {
            Ok(result) => Some(jsonrpc_ok(&id, &result)),
            Err(error) => Some(jsonrpc_err(&id, &error)),
        },
        _ => {
            let error = json!({ "code": -32601, "message": "method not found" });
            Some(jsonrpc_err(&id, &error))
        }
    }
}

fn initialize_result(msg: &serde_json::Value) -> serde_json::Value {
    let protocol_version = msg
        .get("params")
        .and_then(|p| p.get("protocolVersion"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("2024-11-05")
        .to_string();

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "bridge-stdio-test-server", "version": "0" }
    })
}

fn tools_list_result() -> serde_json::Value {
    json!({
        "tools": [
            {
                "name": "add",
                "description": "Add two integers",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "integer" },
                        "b": { "type": "integer" }
                    },
                    "required": ["a", "b"]
                }
            },
            {
                "name": "div",
                "description": "Divide a by b",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "number" },
                        "b": { "type": "number" }
                    },
                    "required": ["a", "b"]
                }
            },
            {
                "name": "whoami",
                "description": "Return per-process instance info",
                "inputSchema": { "type": "object" }
            }
        ]
    })
}

fn tools_call_result(
    state: &mut ServerState,
    msg: &serde_json::Value,
) -> Result<serde_json::Value, serde_json::Value> {
    let params = msg.get("params");
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    let args = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    state.call_count += 1;
    match name {
        "add" => {
            let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
            let b = args.get("b").and_then(serde_json::Value::as_i64).unwrap_or(0);
            Ok(json!({
                "content": [{ "type": "text", "text": (a + b).to_string() }]
            }))
        }
        "div" => {
            let a = args.get("a").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let b = args.get("b").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            if b == 0.0 {
                Ok(json!({
                    "content": [{ "type": "text", "text": "division by zero" }],
                    "isError": true
                }))
            } else {
                Ok(json!({
                    "content": [{ "type": "text", "text": (a / b).to_string() }]
                }))
            }
        }
        "whoami" => {
            let body = json!({
                "instanceId": state.instance_id,
                "pid": state.pid,
                "callCount": state.call_count
            });
            Ok(json!({
                "content": [{ "type": "text", "text": body.to_string() }]
            }))
        }
        _ => Err(json!({ "code": -32601, "message": "unknown tool" })),
    }
}

fn jsonrpc_ok(id: &serde_json::Value, result: &serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_err(id: &serde_json::Value, error: &serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

fn write_json_line(stdout: &mut dyn Write, v: &serde_json::Value) -> anyhow::Result<()> {
    writeln!(stdout, "{}", serde_json::to_string(v)?)?;
    stdout.flush()?;
    Ok(())
}
