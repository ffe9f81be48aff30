//! Risk gating: spawn-time container rewrite and dispatch-time
//! interception.
//!
//! Levels: LOW dispatches directly, MEDIUM parks `tools/call` behind a
//! human confirmation, HIGH runs the backend inside a `docker run --rm`
//! container and annotates every response with its execution
//! environment. An unset level means no risk policy and behaves as
//! pass-through.

pub mod confirmations;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::config::schema::{DockerConfig, ServerConfig};

/// Risk classification attached to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse the wire/config integer encoding (1/2/3).
    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(RiskLevel::Low),
            2 => Some(RiskLevel::Medium),
            3 => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_int(&self) -> u8 {
        match self {
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
        }
    }

    /// Fixed human description reported alongside the level.
    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low risk: executed directly",
            RiskLevel::Medium => "Medium risk: tool calls require human confirmation",
            RiskLevel::High => "High risk: executed in an isolated container",
        }
    }
}

/// Rewrite a HIGH-risk server config into its `docker run` form.
///
/// The argv is built deterministically: `run --rm`, one `-e KEY=VALUE`
/// per env entry, one `-v SPEC` per volume, `--network NAME` when set,
/// the image, the original command unless it is `npm`/`npx`, then the
/// original args. The original env and docker sections are carried on
/// the rewritten config unchanged.
///
/// Returns `None` when the config has no docker section (admission
/// validation prevents that combination from reaching here).
pub fn containerized_config(config: &ServerConfig) -> Option<ServerConfig> {
    let docker = config.docker.as_ref()?;

    let mut args = vec!["run".to_string(), "--rm".to_string()];
    for (key, value) in &config.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for volume in &docker.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    if let Some(network) = &docker.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    args.push(docker.image.clone());
    if config.command != "npm" && config.command != "npx" {
        args.push(config.command.clone());
    }
    args.extend(config.args.iter().cloned());

    Some(ServerConfig {
        command: "docker".to_string(),
        args,
        env: config.env.clone(),
        risk_level: config.risk_level,
        docker: config.docker.clone(),
    })
}

/// Build the synthetic result returned instead of dispatching a
/// MEDIUM-risk `tools/call`.
pub fn confirmation_receipt(
    confirmation_id: &str,
    server_id: &str,
    method: &str,
    params: &Value,
    expires_at: DateTime<Utc>,
) -> Value {
    json!({
        "requires_confirmation": true,
        "confirmation_id": confirmation_id,
        "risk_level": RiskLevel::Medium.as_int(),
        "risk_description": RiskLevel::Medium.description(),
        "server_id": server_id,
        "method": method,
        "tool_name": params.get("name").cloned().unwrap_or(Value::Null),
        "expires_at": expires_at.to_rfc3339(),
    })
}

/// Merge execution-environment metadata into a HIGH-risk response.
///
/// Object results gain an `execution_environment` key; any other result
/// shape is wrapped so the annotation is never lost.
pub fn annotate_high_risk(result: Value, docker: Option<&DockerConfig>) -> Value {
    let environment = json!({
        "risk_level": RiskLevel::High.as_int(),
        "risk_description": RiskLevel::High.description(),
        "docker": true,
        "docker_image": docker.map(|d| d.image.clone()),
    });

    match result {
        Value::Object(mut map) => {
            map.insert("execution_environment".to_string(), environment);
            Value::Object(map)
        }
        other => json!({
            "result": other,
            "execution_environment": environment,
        }),
    }
}
