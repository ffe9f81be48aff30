//! Configuration schema types and admission validation.
//!
//! Wire shapes (`Raw*`) are deliberately loose so a config file with
//! one bad entry still loads; validation converts them into the core
//! types, either strictly (REST admission: bad combinations are
//! rejected) or leniently (file/env load: warn, drop, or demote).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::gate::RiskLevel;

/// Container settings for HIGH-risk servers, as found on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDockerConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// Validated container settings: the image is always present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerConfig {
    pub image: String,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// A server entry as it appears in the config file or a REST admission
/// body. `riskLevel` is kept as a raw JSON value so a wrong type does
/// not fail the surrounding document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "riskLevel")]
    pub risk_level: Option<Value>,
    #[serde(default)]
    pub docker: Option<RawDockerConfig>,
}

/// Validated server configuration, immutable after admission.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Ordered so derived argv (container `-e` flags) is deterministic.
    pub env: BTreeMap<String, String>,
    pub risk_level: Option<RiskLevel>,
    pub docker: Option<DockerConfig>,
}

/// How validation treats invalid risk configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// REST admission: bad combinations are errors.
    Strict,
    /// File/env load: warn, drop the bad field, or demote the level.
    Lenient,
}

/// Validate a raw server entry into a [`ServerConfig`].
///
/// Rules:
/// - `riskLevel` must be the integer 1, 2, or 3; anything else is an
///   error (strict) or dropped with a warning (lenient).
/// - A `docker` section must carry an `image`; otherwise it is an error
///   (strict) or dropped with a warning (lenient).
/// - `riskLevel` 3 without a docker image is an error (strict) or
///   demoted to 2 with a warning (lenient).
pub fn validate(
    id: &str,
    raw: RawServerConfig,
    mode: ValidationMode,
) -> Result<ServerConfig, GatewayError> {
    let mut risk_level = match raw.risk_level {
        None => None,
        Some(value) => match value.as_i64().and_then(RiskLevel::from_int) {
            Some(level) => Some(level),
            None => match mode {
                ValidationMode::Strict => {
                    return Err(GatewayError::ConfigInvalid {
                        reason: format!("riskLevel must be 1, 2, or 3 (got {value})"),
                    });
                }
                ValidationMode::Lenient => {
                    tracing::warn!(server_id = id, %value, "dropping invalid riskLevel");
                    None
                }
            },
        },
    };

    let docker = match raw.docker {
        None => None,
        Some(raw_docker) => match raw_docker.image {
            Some(image) => Some(DockerConfig {
                image,
                volumes: raw_docker.volumes,
                network: raw_docker.network,
            }),
            None => match mode {
                ValidationMode::Strict => {
                    return Err(GatewayError::ConfigInvalid {
                        reason: "docker config requires an image".to_string(),
                    });
                }
                ValidationMode::Lenient => {
                    tracing::warn!(server_id = id, "dropping docker config without image");
                    None
                }
            },
        },
    };

    if risk_level == Some(RiskLevel::High) && docker.is_none() {
        match mode {
            ValidationMode::Strict => {
                return Err(GatewayError::ConfigInvalid {
                    reason: "riskLevel 3 requires docker.image".to_string(),
                });
            }
            ValidationMode::Lenient => {
                tracing::warn!(
                    server_id = id,
                    "riskLevel 3 without docker config; demoting to 2"
                );
                risk_level = Some(RiskLevel::Medium);
            }
        }
    }

    Ok(ServerConfig {
        command: raw.command,
        args: raw.args,
        env: raw.env,
        risk_level,
        docker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(command: &str) -> RawServerConfig {
        RawServerConfig {
            command: command.to_string(),
            args: vec![],
            env: BTreeMap::new(),
            risk_level: None,
            docker: None,
        }
    }

    #[test]
    fn test_plain_config_passes_both_modes() {
        for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
            let config = validate("s", raw("cat"), mode).unwrap();
            assert_eq!(config.command, "cat");
            assert!(config.risk_level.is_none());
        }
    }

    #[test]
    fn test_valid_risk_levels() {
        for (n, level) in [(1, RiskLevel::Low), (2, RiskLevel::Medium)] {
            let mut entry = raw("cat");
            entry.risk_level = Some(json!(n));
            let config = validate("s", entry, ValidationMode::Strict).unwrap();
            assert_eq!(config.risk_level, Some(level));
        }
    }

    #[test]
    fn test_invalid_risk_level_strict_errors() {
        let mut entry = raw("cat");
        entry.risk_level = Some(json!(7));
        let err = validate("s", entry, ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_invalid_risk_level_lenient_drops() {
        for bad in [json!(7), json!("high"), json!(2.5)] {
            let mut entry = raw("cat");
            entry.risk_level = Some(bad);
            let config = validate("s", entry, ValidationMode::Lenient).unwrap();
            assert!(config.risk_level.is_none());
        }
    }

    #[test]
    fn test_high_without_docker_strict_errors() {
        let mut entry = raw("cat");
        entry.risk_level = Some(json!(3));
        let err = validate("s", entry, ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_high_without_docker_lenient_demotes_to_medium() {
        let mut entry = raw("cat");
        entry.risk_level = Some(json!(3));
        let config = validate("s", entry, ValidationMode::Lenient).unwrap();
        assert_eq!(config.risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn test_high_with_docker_image_passes_strict() {
        let mut entry = raw("cat");
        entry.risk_level = Some(json!(3));
        entry.docker = Some(RawDockerConfig {
            image: Some("img:1".to_string()),
            volumes: vec![],
            network: None,
        });
        let config = validate("s", entry, ValidationMode::Strict).unwrap();
        assert_eq!(config.risk_level, Some(RiskLevel::High));
        assert_eq!(config.docker.unwrap().image, "img:1");
    }

    #[test]
    fn test_docker_without_image_strict_errors() {
        let mut entry = raw("cat");
        entry.docker = Some(RawDockerConfig {
            image: None,
            volumes: vec!["/a:/a".to_string()],
            network: None,
        });
        let err = validate("s", entry, ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_raw_config_deserializes_from_file_shape() {
        let entry: RawServerConfig = serde_json::from_value(json!({
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem"],
            "env": {"HOME": "/tmp"},
            "riskLevel": 2
        }))
        .unwrap();
        assert_eq!(entry.command, "npx");
        assert_eq!(entry.args.len(), 2);
        assert_eq!(entry.risk_level, Some(json!(2)));
    }
}
