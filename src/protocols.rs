//! Request and response bodies shared by the HTTP face and the MCP face.

use serde::Deserialize;
use serde_json::Value;

use crate::config::BackendConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub tool_ids: Option<Vec<String>>,
    #[serde(default)]
    pub max_tools: Option<usize>,
    #[serde(default)]
    pub context_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub tool_id: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterServerRequest {
    pub name: String,
    pub config: BackendConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_request_minimal() {
        let req: DiscoverRequest = serde_json::from_str(r#"{"query": "screenshots"}"#).unwrap();
        assert_eq!(req.query, "screenshots");
        assert!(req.tags.is_empty());
        assert!(req.limit.is_none());
        assert!(req.context.is_none());
    }

    #[test]
    fn test_execute_request_defaults_arguments() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"tool_id": "a_b"}"#).unwrap();
        assert!(req.arguments.is_none());
    }

    #[test]
    fn test_register_request_parses_nested_config() {
        let req: RegisterServerRequest = serde_json::from_str(
            r#"{"name": "ctx", "config": {"transport": "stdio", "command": "npx"}}"#,
        )
        .unwrap();
        assert_eq!(req.name, "ctx");
        assert_eq!(req.config.transport.kind(), "stdio");
    }
}
