//! Scriptable stdio MCP stub for integration tests and local demos.
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout: answers `initialize`
//! with a `protocolVersion` result and echoes the method and params of
//! every other request back inside its result, so callers can verify
//! which request a response belongs to.
//!
//! # Environment Variables
//!
//! - `MOCK_BACKEND_LOG`: append every received line to this file.
//! - `MOCK_BACKEND_JITTER_MS`: delay each reply pseudo-randomly (keyed
//!   on the request id) up to this many milliseconds.
//! - `MOCK_BACKEND_MUTE_AFTER_INIT`: when set, answer `initialize` and
//!   then go silent.
//! - `MOCK_BACKEND_SILENT`: when set, never reply at all (the process
//!   keeps reading).
//! - `MOCK_BACKEND_EXIT_ON`: exit immediately (without replying) when a
//!   request with this method arrives.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() {
    let log_path = std::env::var("MOCK_BACKEND_LOG").ok();
    let jitter_ms: u64 = std::env::var("MOCK_BACKEND_JITTER_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let mute_after_init = std::env::var("MOCK_BACKEND_MUTE_AFTER_INIT").is_ok();
    let silent = std::env::var("MOCK_BACKEND_SILENT").is_ok();
    let exit_on = std::env::var("MOCK_BACKEND_EXIT_ON").ok();

    let stdout: Arc<Mutex<Stdout>> = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(path) = &log_path {
            append_log(path, &line);
        }

        let Ok(request) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();

        if exit_on.as_deref() == Some(method.as_str()) {
            std::process::exit(0);
        }

        if silent {
            continue;
        }

        // Notifications carry no id and get no reply.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let reply = if method == "initialize" {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "serverInfo": {"name": "mock-backend", "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {},
                },
            })
        } else if mute_after_init {
            continue;
        } else {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "method": method,
                    "params": request.get("params").cloned().unwrap_or(serde_json::Value::Null),
                },
            })
        };

        let delay = reply_delay(&id, jitter_ms);
        let stdout = stdout.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut line = reply.to_string();
            line.push('\n');
            let mut guard = stdout.lock().await;
            let _ = guard.write_all(line.as_bytes()).await;
            let _ = guard.flush().await;
        });
    }
}

/// Pseudo-random per-request delay, stable for a given id.
fn reply_delay(id: &serde_json::Value, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    let mut hasher = DefaultHasher::new();
    id.to_string().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % jitter_ms)
}

fn append_log(path: &str, line: &str) {
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        let _ = writeln!(file, "{line}");
    }
}
