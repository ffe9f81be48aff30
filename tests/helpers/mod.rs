//! Shared fixtures for the integration suites.
//!
//! Every test backend is the real `mock_backend` binary from this
//! package, spawned through the gateway exactly as a production MCP
//! server would be.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use mcpgate::config::schema::ServerConfig;
use mcpgate::gateway::GatewayConfig;

/// Path to the compiled stdio stub.
pub fn mock_backend_exe() -> String {
    env!("CARGO_BIN_EXE_mock_backend").to_string()
}

/// Production-shaped deadlines, shortened so failures surface in
/// seconds rather than minutes.
pub fn fast_tuning() -> GatewayConfig {
    GatewayConfig {
        handshake_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        settle_delay: Duration::from_millis(50),
        confirmation_ttl: Duration::from_secs(600),
    }
}

/// Config entry spawning the stub with the given extra env vars.
pub fn mock_config(env: &[(&str, &str)]) -> ServerConfig {
    ServerConfig {
        command: mock_backend_exe(),
        args: vec![],
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        risk_level: None,
        docker: None,
    }
}

/// Unique journal path for one test's stub.
pub fn journal_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "mcpgate-test-{tag}-{}.jsonl",
        uuid::Uuid::new_v4()
    ))
}

/// Parse the stub's request journal (one JSON object per line).
pub fn read_journal(path: &PathBuf) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Methods recorded in the stub's journal, in arrival order.
pub fn journal_methods(path: &PathBuf) -> Vec<String> {
    read_journal(path)
        .iter()
        .filter_map(|v| v.get("method").and_then(|m| m.as_str()).map(str::to_string))
        .collect()
}

/// Poll `pred` every 25 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
