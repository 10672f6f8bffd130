//! Transport adapters for backend MCP sessions.
//!
//! Three adapters (stdio, SSE, streamable HTTP) implement one capability set
//! behind the [`Session`] sum type. The MCP conversation itself (initialize
//! handshake, tool enumeration, tool calls) is shared here; adapters only
//! provide raw JSON-RPC request/notify primitives.

pub mod jsonrpc;
pub mod pending;
pub mod sse;
pub mod stdio;
pub mod streamable;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::{BackendConfig, TransportConfig},
    core::error::{GatewayError, GatewayResult},
    transport::jsonrpc::RpcError,
};

pub use sse::SseSession;
pub use stdio::StdioSession;
pub use streamable::StreamableSession;

/// Handshake deadline floor; backends with a larger request timeout get that
/// instead.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool as enumerated from a backend.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input_schema = value
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"}));
        Some(Self {
            name,
            description,
            input_schema,
        })
    }
}

/// The session capability set shared by every adapter.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Run the MCP initialize handshake.
    async fn initialize(&self, timeout: Duration) -> GatewayResult<()>;

    /// Enumerate the backend's tools, following pagination cursors.
    async fn list_tools(&self, timeout: Duration) -> GatewayResult<Vec<ToolDescriptor>>;

    /// Invoke a tool, returning the backend's `result` field verbatim.
    async fn call_tool(&self, name: &str, args: Value, timeout: Duration) -> GatewayResult<Value>;

    /// Lightweight liveness probe.
    async fn health(&self, timeout: Duration) -> GatewayResult<()>;

    /// Tear the session down; all pending requests resolve as cancelled.
    async fn close(&self);
}

/// Raw JSON-RPC primitives an adapter must supply; the MCP conversation is
/// built on top of these in this module.
#[async_trait]
pub(crate) trait RawRpc: Send + Sync {
    fn backend(&self) -> &str;

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> GatewayResult<Result<Value, RpcError>>;

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()>;
}

/// A live connection to one backend, dispatching over the concrete adapter.
pub enum Session {
    Stdio(StdioSession),
    Sse(SseSession),
    Streamable(StreamableSession),
}

impl Session {
    /// Construct the adapter matching the backend's transport and establish
    /// the underlying connection (process spawn or HTTP stream). The MCP
    /// handshake is a separate step.
    pub async fn connect(name: &str, config: &BackendConfig) -> GatewayResult<Session> {
        match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                let session = StdioSession::spawn(name, command, args, env).await?;
                Ok(Session::Stdio(session))
            }
            TransportConfig::Sse { url, headers } => {
                let session = SseSession::connect(name, url, headers).await?;
                Ok(Session::Sse(session))
            }
            TransportConfig::StreamableHttp { url, headers } => {
                let session = StreamableSession::new(name, url, headers)?;
                Ok(Session::Streamable(session))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Session::Stdio(_) => "stdio",
            Session::Sse(_) => "sse",
            Session::Streamable(_) => "streamable-http",
        }
    }

    fn api(&self) -> &dyn SessionApi {
        match self {
            Session::Stdio(s) => s,
            Session::Sse(s) => s,
            Session::Streamable(s) => s,
        }
    }

    pub async fn initialize(&self, timeout: Duration) -> GatewayResult<()> {
        self.api().initialize(timeout).await
    }

    pub async fn list_tools(&self, timeout: Duration) -> GatewayResult<Vec<ToolDescriptor>> {
        self.api().list_tools(timeout).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
    ) -> GatewayResult<Value> {
        self.api().call_tool(name, args, timeout).await
    }

    pub async fn health(&self, timeout: Duration) -> GatewayResult<()> {
        self.api().health(timeout).await
    }

    pub async fn close(&self) {
        self.api().close().await
    }
}

// ---------------------------------------------------------------------------
// Shared MCP conversation, generic over the raw transport
// ---------------------------------------------------------------------------

pub(crate) async fn mcp_initialize<T: RawRpc + ?Sized>(
    rpc: &T,
    timeout: Duration,
) -> GatewayResult<()> {
    let params = json!({
        "protocolVersion": jsonrpc::MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcp-tool-gateway",
            "version": crate::version::VERSION,
        },
    });

    let result = rpc
        .request("initialize", Some(params), timeout)
        .await?
        .map_err(|e| {
            GatewayError::protocol(
                rpc.backend(),
                format!("initialize rejected (code {}): {}", e.code, e.message),
            )
        })?;

    match result.get("protocolVersion").and_then(Value::as_str) {
        Some(version) => {
            if version != jsonrpc::MCP_PROTOCOL_VERSION {
                debug!(
                    backend = rpc.backend(),
                    version, "Backend negotiated a different MCP protocol revision"
                );
            }
        }
        None => {
            return Err(GatewayError::protocol(
                rpc.backend(),
                "initialize response missing protocolVersion",
            ));
        }
    }

    rpc.notify("notifications/initialized", None).await?;
    Ok(())
}

pub(crate) async fn mcp_list_tools<T: RawRpc + ?Sized>(
    rpc: &T,
    timeout: Duration,
) -> GatewayResult<Vec<ToolDescriptor>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = rpc
            .request("tools/list", params, timeout)
            .await?
            .map_err(|e| {
                GatewayError::protocol(
                    rpc.backend(),
                    format!("tools/list failed (code {}): {}", e.code, e.message),
                )
            })?;

        let page = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GatewayError::protocol(rpc.backend(), "tools/list response missing tools array")
            })?;

        for entry in page {
            match ToolDescriptor::from_value(entry) {
                Some(descriptor) => tools.push(descriptor),
                None => warn!(
                    backend = rpc.backend(),
                    "Skipping tool descriptor without a name"
                ),
            }
        }

        cursor = result
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            break;
        }
    }

    Ok(tools)
}

pub(crate) async fn mcp_call_tool<T: RawRpc + ?Sized>(
    rpc: &T,
    name: &str,
    args: Value,
    timeout: Duration,
) -> GatewayResult<Value> {
    let params = json!({ "name": name, "arguments": args });
    match rpc.request("tools/call", Some(params), timeout).await? {
        Ok(result) => Ok(result),
        Err(e) => Err(GatewayError::Tool {
            backend: rpc.backend().to_string(),
            code: e.code,
            message: e.message,
        }),
    }
}
