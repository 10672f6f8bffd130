//! Configuration file loading: read, substitute environment references,
//! parse by extension, validate.

use std::path::Path;

use super::{env_subst, ConfigError, ConfigResult, GatewayConfig};

/// Load and validate a gateway configuration file (YAML or JSON by
/// extension; anything that is not `.json` parses as YAML).
pub async fn load_config(path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    parse_config(&raw, path)
}

/// Parse an already-read config document. Environment substitution runs over
/// the raw text before parsing so `${VAR}` works in any string position.
pub fn parse_config(raw: &str, path: &Path) -> ConfigResult<GatewayConfig> {
    let substituted = env_subst::substitute(raw)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let config: GatewayConfig = if is_json {
        serde_json::from_str(&substituted).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_parse_yaml_with_substitution() {
        std::env::set_var("MTG_TEST_TOKEN", "tok-42");
        let raw = r#"
backends:
  exa:
    transport: sse
    url: "https://mcp.exa.ai/sse"
    headers:
      authorization: "Bearer ${MTG_TEST_TOKEN}"
"#;
        let config = parse_config(raw, &PathBuf::from("config.yaml")).expect("parse");
        match &config.backends["exa"].transport {
            crate::config::TransportConfig::Sse { headers, .. } => {
                assert_eq!(headers["authorization"], "Bearer tok-42");
            }
            other => panic!("expected sse, got {:?}", other),
        }
        std::env::remove_var("MTG_TEST_TOKEN");
    }

    #[test]
    fn test_parse_json_by_extension() {
        let raw = r#"{"backends": {"local": {"transport": "stdio", "command": "mcp"}}}"#;
        let config = parse_config(raw, &PathBuf::from("config.json")).expect("parse");
        assert!(config.backends.contains_key("local"));
    }

    #[test]
    fn test_unresolved_variable_is_rejected() {
        let raw = r#"
backends:
  exa:
    transport: sse
    url: "${MTG_DEFINITELY_UNSET_URL}"
"#;
        let err = parse_config(raw, &PathBuf::from("config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedVariable { .. }));
    }

    #[test]
    fn test_default_form_resolves() {
        let raw = r#"
backends:
  exa:
    transport: sse
    url: "${MTG_UNSET_URL:-https://fallback.example/sse}"
"#;
        let config = parse_config(raw, &PathBuf::from("config.yaml")).expect("parse");
        match &config.backends["exa"].transport {
            crate::config::TransportConfig::Sse { url, .. } => {
                assert_eq!(url, "https://fallback.example/sse");
            }
            other => panic!("expected sse, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = parse_config("backends: [not a map", &PathBuf::from("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_config_fails_validation() {
        let raw = r#"
backends:
  bad:
    transport: stdio
    command: ""
"#;
        assert!(parse_config(raw, &PathBuf::from("c.yaml")).is_err());
    }
}
