//! Gateway and backend configuration types.
//!
//! The file schema mirrors what the config loader produces after environment
//! substitution; the core only ever sees these parsed structs.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult};

/// Complete gateway configuration: process settings plus the declarative
/// backend set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Backend MCP servers keyed by unique name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Hard ceiling for gating token budgets
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: u32,

    /// Hard ceiling for gating tool counts
    #[serde(default = "default_max_tools")]
    pub max_tools_per_request: usize,

    #[serde(default = "default_true")]
    pub config_watch_enabled: bool,

    /// Default health check interval for backends that do not override it
    #[serde(default = "default_health_interval")]
    pub health_check_interval_s: u64,

    /// Default per-request deadline
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_s: u64,

    /// When true, execute_tool rejects tools outside the provisioned set
    #[serde(default)]
    pub require_provisioning: bool,

    /// Errors per minute a backend may sustain before the circuit throttles
    #[serde(default = "default_max_errors_per_minute")]
    pub max_errors_per_minute: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            log_level: default_log_level(),
            max_tokens_per_request: default_max_tokens(),
            max_tools_per_request: default_max_tools(),
            config_watch_enabled: true,
            health_check_interval_s: default_health_interval(),
            connection_timeout_s: default_connection_timeout(),
            require_provisioning: false,
            max_errors_per_minute: default_max_errors_per_minute(),
        }
    }
}

/// A declarative backend server entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tool_filter: ToolFilterConfig,

    #[serde(default)]
    pub health: BackendHealthConfig,

    #[serde(default)]
    pub options: BackendOptions,

    /// Extra tags merged into every tool published by this backend
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Transport selection and its transport-specific fields.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .finish(),
            TransportConfig::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .finish(),
            TransportConfig::StreamableHttp { url, headers } => f
                .debug_struct("StreamableHttp")
                .field("url", url)
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Sse { .. } => "sse",
            TransportConfig::StreamableHttp { .. } => "streamable-http",
        }
    }
}

/// Allow/deny filter over tool names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFilterConfig {
    #[serde(default)]
    pub mode: FilterMode,

    /// Names or `*` wildcard patterns, matched case-insensitively
    #[serde(default)]
    pub list: Vec<String>,
}

impl Default for ToolFilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Allow,
            list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Allow,
    Deny,
}

/// Per-backend health check settings. Unset interval/timeout fall back to
/// the gateway-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_s: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,

    /// Optional HTTP health endpoint (sse backends); falls back to tools/list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for BackendHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: None,
            timeout_s: None,
            endpoint: None,
        }
    }
}

/// Per-backend request options. An unset timeout falls back to the gateway's
/// `connection_timeout_s`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout_s: None,
            retry_count: default_retry_count(),
        }
    }
}

fn default_port() -> u16 {
    8001
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_max_tools() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_health_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_retry_count() -> u32 {
    3
}

fn default_max_errors_per_minute() -> u32 {
    5
}

impl GatewayConfig {
    /// Validate settings and every backend entry.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.gateway.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gateway.port".to_string(),
                value: "0".to_string(),
                reason: "port must be non-zero".to_string(),
            });
        }

        match self.gateway.log_level.as_str() {
            "debug" | "info" | "warning" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "gateway.log_level".to_string(),
                    value: other.to_string(),
                    reason: "expected one of debug/info/warning/error".to_string(),
                });
            }
        }

        for (name, backend) in &self.backends {
            validate_backend_name(name)?;
            backend.validate(name)?;
        }

        Ok(())
    }
}

impl BackendConfig {
    pub fn validate(&self, name: &str) -> ConfigResult<()> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: format!("backends.{}.command", name),
                    });
                }
            }
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => {
                if url.is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: format!("backends.{}.url", name),
                    });
                }
                url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                    field: format!("backends.{}.url", name),
                    value: url.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        if self.options.timeout_s == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("backends.{}.options.timeout_s", name),
                value: "0".to_string(),
                reason: "timeout must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Whether switching from `other` to `self` requires a reconnect.
    /// Filter, health, and option changes apply without touching the session.
    pub fn requires_reconnect(&self, other: &BackendConfig) -> bool {
        self.transport != other.transport || self.enabled != other.enabled
    }
}

/// Server names are used inside tool ids, so they stay restricted.
pub fn validate_backend_name(name: &str) -> ConfigResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "backends".to_string(),
            value: name.to_string(),
            reason: "server name must be alphanumeric with underscores/hyphens only".to_string(),
        })
    }
}
