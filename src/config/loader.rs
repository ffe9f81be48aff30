//! Config file loading and environment overrides.
//!
//! The file lives at `$MCP_CONFIG_PATH` (default `./mcp_config.json`)
//! and holds `{"mcpServers": {"<id>": {…}}}`. A missing file is an
//! empty server set; an unparsable one is a startup error. After the
//! file, `MCP_SERVER_<NAME>_COMMAND`-style variables create or
//! overwrite entries, with per-field leniency (bad values are warned
//! about and ignored, never fatal).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::schema::{RawDockerConfig, RawServerConfig, ServerConfig, ValidationMode, validate};
use crate::error::GatewayError;

/// Env var naming the config file path.
pub const CONFIG_PATH_VAR: &str = "MCP_CONFIG_PATH";

/// Prefix of server-defining environment overrides.
const ENV_PREFIX: &str = "MCP_SERVER_";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, RawServerConfig>,
}

/// Resolve the config file path from the environment.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./mcp_config.json"))
}

/// Load server configs from a file, validating each entry leniently.
///
/// # Errors
///
/// [`GatewayError::ConfigFile`] when the file exists but cannot be read
/// or parsed. A missing file yields an empty map.
pub fn load_file(path: &Path) -> Result<BTreeMap<String, ServerConfig>, GatewayError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found; starting with no servers");
        return Ok(BTreeMap::new());
    }

    let config_err = |reason: String| GatewayError::ConfigFile {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
    let file: FileConfig =
        serde_json::from_str(&contents).map_err(|e| config_err(e.to_string()))?;

    let mut servers = BTreeMap::new();
    for (id, raw) in file.mcp_servers {
        match validate(&id, raw, ValidationMode::Lenient) {
            Ok(config) => {
                servers.insert(id, config);
            }
            Err(e) => {
                tracing::warn!(server_id = %id, error = %e, "skipping invalid server entry");
            }
        }
    }
    Ok(servers)
}

/// Derive server configs from `MCP_SERVER_<NAME>_COMMAND` variables.
///
/// The server id is `lowercase(<NAME>)`. Companion variables:
/// `_ARGS` (comma-split), `_ENV` (JSON object), `_RISK_LEVEL`
/// (integer 1/2/3), `_DOCKER_CONFIG` (JSON object). Invalid companion
/// values are logged and ignored; a HIGH level without a usable docker
/// config is demoted to MEDIUM by lenient validation.
pub fn env_overrides(
    vars: impl Iterator<Item = (String, String)>,
) -> BTreeMap<String, ServerConfig> {
    let vars: BTreeMap<String, String> = vars.collect();
    let mut servers = BTreeMap::new();

    for (key, command) in &vars {
        let Some(name) = key
            .strip_prefix(ENV_PREFIX)
            .and_then(|rest| rest.strip_suffix("_COMMAND"))
        else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let id = name.to_lowercase();

        let lookup = |suffix: &str| vars.get(&format!("{ENV_PREFIX}{name}_{suffix}"));

        let args = lookup("ARGS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let env = lookup("ENV")
            .and_then(|raw| {
                serde_json::from_str::<BTreeMap<String, String>>(raw)
                    .map_err(|e| {
                        tracing::warn!(server_id = %id, error = %e, "ignoring unparsable _ENV");
                        e
                    })
                    .ok()
            })
            .unwrap_or_default();

        let risk_level = lookup("RISK_LEVEL").and_then(|raw| match raw.trim().parse::<i64>() {
            Ok(n) => Some(serde_json::Value::from(n)),
            Err(_) => {
                tracing::warn!(server_id = %id, value = %raw, "ignoring invalid _RISK_LEVEL");
                None
            }
        });

        let docker = lookup("DOCKER_CONFIG").and_then(|raw| {
            serde_json::from_str::<RawDockerConfig>(raw)
                .map_err(|e| {
                    tracing::warn!(server_id = %id, error = %e, "ignoring unparsable _DOCKER_CONFIG");
                    e
                })
                .ok()
        });

        let raw = RawServerConfig {
            command: command.clone(),
            args,
            env,
            risk_level,
            docker,
        };
        match validate(&id, raw, ValidationMode::Lenient) {
            Ok(config) => {
                tracing::info!(server_id = %id, "server configured from environment");
                servers.insert(id, config);
            }
            Err(e) => {
                tracing::warn!(server_id = %id, error = %e, "skipping env-configured server");
            }
        }
    }

    servers
}

/// Load the full configuration: file first, then env overrides on top.
pub fn load(path: &Path) -> Result<BTreeMap<String, ServerConfig>, GatewayError> {
    let mut servers = load_file(path)?;
    for (id, config) in env_overrides(std::env::vars()) {
        servers.insert(id, config);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::RiskLevel;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_missing_file_is_empty_set() {
        let servers = load_file(Path::new("/nonexistent/mcp_config.json")).unwrap();
        assert!(servers.is_empty());
    }

    #[test]
    fn test_load_file_parses_servers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{
                "files": {{"command": "npx", "args": ["-y", "server-filesystem"], "riskLevel": 2}},
                "search": {{"command": "python3", "args": ["search.py"]}}
            }}}}"#
        )
        .unwrap();

        let servers = load_file(file.path()).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["files"].risk_level, Some(RiskLevel::Medium));
        assert!(servers["search"].risk_level.is_none());
    }

    #[test]
    fn test_load_file_demotes_high_without_docker() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{"risky": {{"command": "sh", "riskLevel": 3}}}}}}"#
        )
        .unwrap();

        let servers = load_file(file.path()).unwrap();
        assert_eq!(servers["risky"].risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn test_load_file_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_file(file.path()).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigFile { .. }));
    }

    #[test]
    fn test_env_override_minimal() {
        let servers = env_overrides(vars(&[("MCP_SERVER_FILES_COMMAND", "npx")]));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers["files"].command, "npx");
        assert!(servers["files"].args.is_empty());
    }

    #[test]
    fn test_env_override_args_comma_split() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_FILES_COMMAND", "npx"),
            ("MCP_SERVER_FILES_ARGS", "-y, server-filesystem ,/tmp"),
        ]));
        assert_eq!(servers["files"].args, ["-y", "server-filesystem", "/tmp"]);
    }

    #[test]
    fn test_env_override_env_json() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_FILES_COMMAND", "npx"),
            ("MCP_SERVER_FILES_ENV", r#"{"HOME": "/tmp"}"#),
        ]));
        assert_eq!(servers["files"].env["HOME"], "/tmp");
    }

    #[test]
    fn test_env_override_bad_env_json_ignored() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_FILES_COMMAND", "npx"),
            ("MCP_SERVER_FILES_ENV", "{broken"),
        ]));
        assert!(servers["files"].env.is_empty());
    }

    #[test]
    fn test_env_override_invalid_risk_ignored() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_FILES_COMMAND", "npx"),
            ("MCP_SERVER_FILES_RISK_LEVEL", "extreme"),
        ]));
        assert!(servers["files"].risk_level.is_none());
    }

    #[test]
    fn test_env_override_high_with_docker() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_RISKY_COMMAND", "python3"),
            ("MCP_SERVER_RISKY_RISK_LEVEL", "3"),
            (
                "MCP_SERVER_RISKY_DOCKER_CONFIG",
                r#"{"image": "img:1", "volumes": ["/a:/a"]}"#,
            ),
        ]));
        assert_eq!(servers["risky"].risk_level, Some(RiskLevel::High));
        assert_eq!(servers["risky"].docker.as_ref().unwrap().image, "img:1");
    }

    #[test]
    fn test_env_override_high_without_docker_demotes() {
        let servers = env_overrides(vars(&[
            ("MCP_SERVER_RISKY_COMMAND", "python3"),
            ("MCP_SERVER_RISKY_RISK_LEVEL", "3"),
        ]));
        assert_eq!(servers["risky"].risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn test_env_override_name_lowercased() {
        let servers = env_overrides(vars(&[("MCP_SERVER_WEB_SEARCH_COMMAND", "python3")]));
        assert!(servers.contains_key("web_search"));
    }
}
