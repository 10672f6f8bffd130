//! The proxy service: the single place the public surfaces terminate.
//!
//! Both the REST handlers and the MCP endpoint call into these operations;
//! neither face carries business logic of its own.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    client::{ClientManager, ServerStatus},
    config::BackendConfig,
    core::error::{GatewayError, GatewayResult},
    discovery::{DiscoveryService, ToolMatch},
    gating::{GatingService, ProvisionOutcome},
    registry::ToolRegistry,
};

/// Discovery response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverOutcome {
    pub tools: Vec<ToolMatch>,
    pub query_id: String,
    pub timestamp: String,
}

pub struct ProxyService {
    registry: Arc<ToolRegistry>,
    manager: Arc<ClientManager>,
    discovery: Arc<DiscoveryService>,
    gating: Arc<GatingService>,
}

impl ProxyService {
    pub fn new(
        registry: Arc<ToolRegistry>,
        manager: Arc<ClientManager>,
        discovery: Arc<DiscoveryService>,
        gating: Arc<GatingService>,
    ) -> Self {
        Self {
            registry,
            manager,
            discovery,
            gating,
        }
    }

    pub fn gating(&self) -> &GatingService {
        &self.gating
    }

    /// Rank registry tools for a natural-language query.
    pub fn discover_tools(
        &self,
        query: &str,
        context: Option<&str>,
        tags: &[String],
        limit: Option<usize>,
    ) -> GatewayResult<DiscoverOutcome> {
        let tools = self.discovery.discover(query, context, tags, limit)?;
        Ok(DiscoverOutcome {
            tools,
            query_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Select a budgeted subset of tools; with enforcement on, the accepted
    /// set becomes the client's provisioned set.
    pub fn provision_tools(
        &self,
        tool_ids: Option<&[String]>,
        max_tools: Option<usize>,
        context_tokens: Option<u32>,
    ) -> GatewayResult<ProvisionOutcome> {
        self.gating.provision(tool_ids, max_tools, context_tokens)
    }

    /// Route a tool invocation to its owning backend.
    pub async fn execute_tool(&self, tool_id: &str, arguments: Value) -> GatewayResult<Value> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| GatewayError::UnknownTool {
                tool_id: tool_id.to_string(),
            })?;

        if self.gating.require_provisioning() && !self.gating.is_provisioned(tool_id) {
            return Err(GatewayError::NotProvisioned {
                tool_id: tool_id.to_string(),
            });
        }

        // Tool names may themselves contain underscores, so the split uses
        // the known server name as the prefix rather than the first '_'.
        let prefix = format!("{}_", tool.server);
        let tool_name = tool_id.strip_prefix(&prefix).unwrap_or(&tool.name);

        let result = self
            .manager
            .call(&tool.server, tool_name, arguments)
            .await?;
        self.gating.record_use(tool_id);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Server CRUD, through the reconcile path
    // ------------------------------------------------------------------

    pub async fn register_server(
        &self,
        name: &str,
        config: BackendConfig,
    ) -> GatewayResult<ServerStatus> {
        crate::config::validate_backend_name(name)
            .and_then(|()| config.validate(name))
            .map_err(|e| GatewayError::config(e.to_string()))?;

        let mut desired = self.manager.desired_backends();
        if desired.contains_key(name) {
            return Err(GatewayError::ServerExists {
                name: name.to_string(),
            });
        }
        desired.insert(name.to_string(), config);
        self.manager.reconcile(desired).await;

        self.manager
            .status(name)
            .ok_or_else(|| GatewayError::ServerNotFound {
                name: name.to_string(),
            })
    }

    pub fn list_servers(&self) -> Vec<ServerStatus> {
        self.manager.statuses()
    }

    pub fn server_status(&self, name: &str) -> GatewayResult<ServerStatus> {
        self.manager
            .status(name)
            .ok_or_else(|| GatewayError::ServerNotFound {
                name: name.to_string(),
            })
    }

    pub async fn remove_server(&self, name: &str) -> GatewayResult<()> {
        let mut desired = self.manager.desired_backends();
        if desired.remove(name).is_none() {
            return Err(GatewayError::ServerNotFound {
                name: name.to_string(),
            });
        }
        self.manager.reconcile(desired).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GatewaySettings,
        discovery::HashingEncoder,
        registry::Tool,
    };

    fn disabled_stdio() -> BackendConfig {
        let mut config: BackendConfig = serde_yaml::from_str(
            r#"
transport: stdio
command: "echo"
"#,
        )
        .unwrap();
        config.enabled = false;
        config
    }

    fn proxy_with(registry: Arc<ToolRegistry>, require_provisioning: bool) -> ProxyService {
        let manager = ClientManager::new(Arc::clone(&registry), GatewaySettings::default());
        let discovery = Arc::new(DiscoveryService::new(
            Arc::clone(&registry),
            Arc::new(HashingEncoder::new()),
        ));
        let gating = Arc::new(GatingService::new(
            Arc::clone(&registry),
            10,
            2000,
            require_provisioning,
        ));
        ProxyService::new(registry, manager, discovery, gating)
    }

    fn seeded_registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry.replace_server(
            "puppeteer",
            vec![Tool::new(
                "puppeteer",
                "take_screenshot",
                "Take a screenshot of the page",
                serde_json::json!({"type": "object"}),
                vec!["screenshot".to_string()],
                120,
            )],
        );
        registry
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let proxy = proxy_with(Arc::new(ToolRegistry::new()), false);
        let err = proxy
            .execute_tool("ghost_tool", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_execute_unprovisioned_tool_rejected_when_enforced() {
        let proxy = proxy_with(seeded_registry(), true);
        let err = proxy
            .execute_tool("puppeteer_take_screenshot", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotProvisioned { .. }));
    }

    #[tokio::test]
    async fn test_execute_known_tool_without_session_is_not_connected() {
        // tool is in the registry but its backend has no live session
        let proxy = proxy_with(seeded_registry(), false);
        let err = proxy
            .execute_tool("puppeteer_take_screenshot", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_register_duplicate_server_conflicts() {
        let proxy = proxy_with(Arc::new(ToolRegistry::new()), false);
        proxy
            .register_server("dup", disabled_stdio())
            .await
            .unwrap();
        let err = proxy
            .register_server("dup", disabled_stdio())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ServerExists { .. }));
    }

    #[tokio::test]
    async fn test_register_invalid_config_rejected() {
        let proxy = proxy_with(Arc::new(ToolRegistry::new()), false);
        let config: BackendConfig = serde_yaml::from_str(
            r#"
transport: stdio
command: ""
enabled: false
"#,
        )
        .unwrap();
        let err = proxy.register_server("bad", config).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[tokio::test]
    async fn test_remove_unknown_server_not_found() {
        let proxy = proxy_with(Arc::new(ToolRegistry::new()), false);
        let err = proxy.remove_server("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::ServerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_register_then_remove_round_trip() {
        let proxy = proxy_with(Arc::new(ToolRegistry::new()), false);

        let status = proxy
            .register_server("tmp", disabled_stdio())
            .await
            .unwrap();
        assert_eq!(status.name, "tmp");
        assert_eq!(proxy.list_servers().len(), 1);

        proxy.remove_server("tmp").await.unwrap();
        assert!(proxy.list_servers().is_empty());
        assert!(proxy.server_status("tmp").is_err());
    }

    #[tokio::test]
    async fn test_discover_envelope() {
        let proxy = proxy_with(seeded_registry(), false);
        let outcome = proxy
            .discover_tools("take a screenshot", None, &[], Some(3))
            .unwrap();
        assert_eq!(outcome.tools.len(), 1);
        assert_eq!(outcome.tools[0].tool_id, "puppeteer_take_screenshot");
        assert!(!outcome.query_id.is_empty());
        assert!(!outcome.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_provision_delegates_to_gating() {
        let proxy = proxy_with(seeded_registry(), false);
        let outcome = proxy.provision_tools(None, Some(5), Some(500)).unwrap();
        assert_eq!(outcome.tools.len(), 1);
        assert_eq!(outcome.metadata.total_tokens, 120);
        assert!(outcome.metadata.gating_applied);
    }
}
