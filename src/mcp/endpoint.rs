//! Single MCP endpoint (`/mcp`) over streamable-HTTP framing.
//!
//! Every POST carries one JSON-RPC frame. The advertised tool catalog is the
//! gateway's own surface; tool calls dispatch straight into the proxy
//! service, so this face stays a translator.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    app_context::GatewayContext,
    core::error::GatewayError,
    protocols::{DiscoverRequest, ExecuteRequest, ProvisionRequest, RegisterServerRequest},
    transport::jsonrpc::{JSONRPC_VERSION, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND},
    version,
};

const INVALID_PARAMS: i64 = -32602;
const INVALID_REQUEST: i64 = -32600;

/// The MCP endpoint has no server-push channel; clients poll over POST.
pub async fn handle_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

pub async fn handle_post(
    State(context): State<Arc<GatewayContext>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(obj) = body.as_object() else {
        return rpc_error(&Value::Null, INVALID_REQUEST, "expected a JSON-RPC object");
    };

    let method = obj.get("method").and_then(Value::as_str).unwrap_or_default();
    let id = obj.get("id").cloned();
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    match id {
        None | Some(Value::Null) => {
            // notifications get acknowledged and dropped
            debug!(method, "MCP notification received");
            StatusCode::ACCEPTED.into_response()
        }
        Some(id) => dispatch(context, method, params, id).await,
    }
}

async fn dispatch(
    context: Arc<GatewayContext>,
    method: &str,
    params: Value,
    id: Value,
) -> Response {
    match method {
        "initialize" => rpc_result(
            &id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": "mcp-tool-gateway",
                    "version": version::VERSION,
                },
            }),
        ),
        "ping" => rpc_result(&id, json!({})),
        "tools/list" => rpc_result(&id, json!({ "tools": gateway_tools() })),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return rpc_error(&id, INVALID_PARAMS, "tools/call requires a name");
            };
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            match call_gateway_tool(&context, name, arguments).await {
                Ok(result) => rpc_result(&id, result),
                Err(response) => response_with_id(&id, response),
            }
        }
        other => rpc_error(&id, METHOD_NOT_FOUND, &format!("unknown method: {}", other)),
    }
}

/// Invoke one of the gateway's own tools. Gateway errors come back as MCP
/// tool results with `isError`, not as protocol failures.
async fn call_gateway_tool(
    context: &GatewayContext,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolCallFailure> {
    match name {
        "discover_tools" => {
            let request: DiscoverRequest = parse_args(arguments)?;
            let outcome = context.proxy.discover_tools(
                &request.query,
                request.context.as_deref(),
                &request.tags,
                request.limit,
            )?;
            Ok(tool_success(serde_json::to_value(outcome).unwrap_or_default()))
        }
        "provision_tools" => {
            let request: ProvisionRequest = parse_args(arguments)?;
            let outcome = context.proxy.provision_tools(
                request.tool_ids.as_deref(),
                request.max_tools,
                request.context_tokens,
            )?;
            Ok(tool_success(serde_json::to_value(outcome).unwrap_or_default()))
        }
        "execute_tool" => {
            let request: ExecuteRequest = parse_args(arguments)?;
            let result = context
                .proxy
                .execute_tool(&request.tool_id, request.arguments.unwrap_or(json!({})))
                .await?;
            Ok(tool_success(json!({ "result": result })))
        }
        "register_mcp_server" => {
            let request: RegisterServerRequest = parse_args(arguments)?;
            let status = context
                .proxy
                .register_server(&request.name, request.config)
                .await?;
            Ok(tool_success(serde_json::to_value(status).unwrap_or_default()))
        }
        "list_mcp_servers" => {
            let statuses = context.proxy.list_servers();
            Ok(tool_success(json!({ "servers": statuses })))
        }
        "remove_mcp_server" => {
            let name = arguments
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ToolCallFailure::Params("remove_mcp_server requires a name".to_string())
                })?;
            context.proxy.remove_server(name).await?;
            Ok(tool_success(json!({ "removed": name })))
        }
        other => Err(ToolCallFailure::Params(format!(
            "unknown gateway tool: {}",
            other
        ))),
    }
}

enum ToolCallFailure {
    Params(String),
    Gateway(GatewayError),
}

impl From<GatewayError> for ToolCallFailure {
    fn from(err: GatewayError) -> Self {
        ToolCallFailure::Gateway(err)
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolCallFailure> {
    serde_json::from_value(arguments).map_err(|e| ToolCallFailure::Params(e.to_string()))
}

fn tool_success(payload: Value) -> Value {
    let text = serde_json::to_string(&payload).unwrap_or_else(|_| payload.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    })
}

fn tool_failure(err: &GatewayError) -> Value {
    json!({
        "content": [{ "type": "text", "text": format!("{}: {}", err.code(), err) }],
        "isError": true,
    })
}

fn response_with_id(id: &Value, failure: ToolCallFailure) -> Response {
    match failure {
        ToolCallFailure::Params(message) => rpc_error(id, INVALID_PARAMS, &message),
        ToolCallFailure::Gateway(err) => rpc_result(id, tool_failure(&err)),
    }
}

fn rpc_result(id: &Value, result: Value) -> Response {
    Json(json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    }))
    .into_response()
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Response {
    Json(json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    }))
    .into_response()
}

/// The fixed tool catalog this endpoint advertises. Schemas mirror the HTTP
/// request bodies.
fn gateway_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "discover_tools",
            "description": "Find backend tools relevant to a natural-language task description, ranked by semantic similarity with tag boosting.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What you want to accomplish" },
                    "context": { "type": "string", "description": "Optional extra context for the search" },
                    "tags": { "type": "array", "items": { "type": "string" }, "description": "Restrict candidates to tools carrying any of these tags" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 50, "description": "Maximum results (default 10)" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "provision_tools",
            "description": "Select a bounded set of tools under token and count budgets, ready for MCP export.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_ids": { "type": "array", "items": { "type": "string" }, "description": "Explicit tool ids to provision" },
                    "max_tools": { "type": "integer", "minimum": 1, "description": "Cap on the number of tools" },
                    "context_tokens": { "type": "integer", "minimum": 0, "description": "Token budget for the selection" }
                }
            }
        }),
        json!({
            "name": "execute_tool",
            "description": "Invoke a backend tool by fully-qualified id (server_toolname) and return its result.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "Fully-qualified tool id" },
                    "arguments": { "type": "object", "description": "Arguments matching the tool's schema" }
                },
                "required": ["tool_id"]
            }
        }),
        json!({
            "name": "register_mcp_server",
            "description": "Register a new backend MCP server and connect to it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Unique backend name" },
                    "config": { "type": "object", "description": "Backend configuration (transport, command/url, filters)" }
                },
                "required": ["name", "config"]
            }
        }),
        json!({
            "name": "list_mcp_servers",
            "description": "List registered backend servers with connection and health status.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "remove_mcp_server",
            "description": "Remove a backend server and withdraw its tools.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Backend name to remove" }
                },
                "required": ["name"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_exact() {
        let names: Vec<String> = gateway_tools()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "discover_tools",
                "provision_tools",
                "execute_tool",
                "register_mcp_server",
                "list_mcp_servers",
                "remove_mcp_server",
            ]
        );
    }

    #[test]
    fn test_catalog_schemas_are_objects() {
        for tool in gateway_tools() {
            assert_eq!(tool["inputSchema"]["type"], "object", "{}", tool["name"]);
            assert!(tool["description"].as_str().unwrap().len() > 10);
        }
    }

    #[test]
    fn test_tool_success_wraps_payload_as_text() {
        let result = tool_success(json!({"a": 1}));
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn test_tool_failure_carries_code() {
        let err = GatewayError::UnknownTool {
            tool_id: "x_y".to_string(),
        };
        let result = tool_failure(&err);
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("UnknownTool:"));
    }
}
