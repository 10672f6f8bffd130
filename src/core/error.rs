//! Error types for the gateway core.
//!
//! One taxonomy is shared by transports, the client manager, and both public
//! faces; the HTTP mapping lives next to the kinds so the surfaces stay thin.

use axum::http::StatusCode;

/// Gateway-wide errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Transport failure for backend {backend}: {reason}")]
    Transport { backend: String, reason: String },

    #[error("Protocol violation from backend {backend}: {reason}")]
    Protocol { backend: String, reason: String },

    #[error("Request to backend {backend} timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Tool call failed on backend {backend} (code {code}): {message}")]
    Tool {
        backend: String,
        code: i64,
        message: String,
    },

    #[error("Unknown tool: {tool_id}")]
    UnknownTool { tool_id: String },

    #[error("Backend not connected: {backend}")]
    NotConnected { backend: String },

    #[error("Tool {tool_id} is not provisioned")]
    NotProvisioned { tool_id: String },

    #[error("No tool fits the requested budget ({context_tokens} tokens, {max_tools} tools)")]
    BudgetExceeded {
        context_tokens: u32,
        max_tools: usize,
    },

    #[error("Discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("Server already registered: {name}")]
    ServerExists { name: String },

    #[error("Server not found: {name}")]
    ServerNotFound { name: String },
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn transport(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::Transport {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::Protocol {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        GatewayError::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        GatewayError::Config {
            reason: reason.into(),
        }
    }

    /// Whether the failure counts against the owning backend's error budget
    /// (circuit breaker / reconnect), as opposed to a caller mistake.
    pub fn is_backend_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. }
                | GatewayError::Protocol { .. }
                | GatewayError::Timeout { .. }
        )
    }

    /// HTTP status for the REST face.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config { .. }
            | GatewayError::UnknownTool { .. }
            | GatewayError::NotProvisioned { .. }
            | GatewayError::BudgetExceeded { .. }
            | GatewayError::Discovery { .. } => StatusCode::BAD_REQUEST,
            GatewayError::ServerExists { .. } => StatusCode::CONFLICT,
            GatewayError::ServerNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::NotConnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Tool { .. }
            | GatewayError::Transport { .. }
            | GatewayError::Protocol { .. }
            | GatewayError::Cancelled { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable code used in error payloads and MCP results.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config { .. } => "ConfigError",
            GatewayError::Transport { .. } => "TransportError",
            GatewayError::Protocol { .. } => "ProtocolError",
            GatewayError::Timeout { .. } => "Timeout",
            GatewayError::Cancelled { .. } => "Cancelled",
            GatewayError::Tool { .. } => "ToolError",
            GatewayError::UnknownTool { .. } => "UnknownTool",
            GatewayError::NotConnected { .. } => "NotConnected",
            GatewayError::NotProvisioned { .. } => "NotProvisioned",
            GatewayError::BudgetExceeded { .. } => "BudgetExceeded",
            GatewayError::Discovery { .. } => "DiscoveryError",
            GatewayError::ServerExists { .. } => "ServerExists",
            GatewayError::ServerNotFound { .. } => "ServerNotFound",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let backend = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if err.is_timeout() {
            GatewayError::Timeout {
                backend,
                timeout_secs: 0,
            }
        } else {
            GatewayError::Transport {
                backend,
                reason: err.to_string(),
            }
        }
    }
}
