//! JSON-RPC 2.0 framing for MCP sessions.
//!
//! Frames travel as single-line JSON over stdio and as SSE `data:` payloads
//! or HTTP bodies over the network transports. Inbound frames are classified
//! structurally: an `id` plus `result`/`error` is a response, a `method` with
//! an `id` is a server-initiated request, a bare `method` is a notification.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this gateway speaks to backends.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;

/// Outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound notification (no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response to one of our requests.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: u64,
    pub payload: Result<Value, RpcError>,
}

/// An inbound frame after classification.
#[derive(Debug, Clone)]
pub enum Frame {
    Response(Response),
    /// Server-initiated request (e.g. ping); carries its id for the reply.
    ServerRequest {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Frame {
    /// Classify a parsed JSON value as a JSON-RPC frame.
    pub fn from_value(value: Value) -> Option<Frame> {
        let obj = value.as_object()?;
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return None;
        }

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = obj.get("params").cloned();
            return match obj.get("id") {
                Some(id) if !id.is_null() => Some(Frame::ServerRequest {
                    id: id.clone(),
                    method,
                    params,
                }),
                _ => Some(Frame::Notification { method, params }),
            };
        }

        let id = obj.get("id")?.as_u64()?;
        if let Some(error) = obj.get("error") {
            let error: RpcError = serde_json::from_value(error.clone()).ok()?;
            return Some(Frame::Response(Response {
                id,
                payload: Err(error),
            }));
        }
        if let Some(result) = obj.get("result") {
            return Some(Frame::Response(Response {
                id,
                payload: Ok(result.clone()),
            }));
        }
        None
    }

    /// Parse one line of text. `None` for anything that is not a well-formed
    /// frame — the stdio adapter uses this to discard banner output.
    pub fn parse_line(line: &str) -> Option<Frame> {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.starts_with('{') {
            return None;
        }
        let value: Value = serde_json::from_str(trimmed).ok()?;
        Frame::from_value(value)
    }
}

/// Serialize a reply to a server-initiated request.
pub fn server_reply(id: &Value, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Serialize an error reply to a server-initiated request.
pub fn server_error_reply(id: &Value, code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Monotonic per-session request id allocator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
