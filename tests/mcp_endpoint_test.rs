// Tests for the MCP face at /mcp: handshake, catalog, and tool dispatch.

mod common;

use common::{
    mock_backend::{search_tools, MockStreamableBackend},
    serve_gateway,
};
use mtg::{app_context::GatewayContext, config::GatewayConfig};
use serde_json::{json, Value};

async fn gateway(yaml: &str) -> (std::sync::Arc<GatewayContext>, String) {
    let config: GatewayConfig = serde_yaml::from_str(yaml).expect("config");
    let context = GatewayContext::from_config(config).await.expect("context");
    let base = serve_gateway(std::sync::Arc::clone(&context)).await;
    (context, format!("{}/mcp", base))
}

async fn rpc(url: &str, frame: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .json(&frame)
        .send()
        .await
        .expect("POST /mcp");
    let status = response.status().as_u16();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

#[tokio::test]
async fn test_initialize_handshake() {
    let (_context, url) = gateway("backends: {}").await;

    let (status, body) = rpc(
        &url,
        request(1, "initialize", json!({"protocolVersion": "2024-11-05"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert!(body["result"]["capabilities"]["tools"].is_object());

    // the initialized notification is acknowledged without a body
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);
}

#[tokio::test]
async fn test_tools_list_advertises_gateway_surface() {
    let (_context, url) = gateway("backends: {}").await;

    let (status, body) = rpc(&url, request(2, "tools/list", json!({}))).await;
    assert_eq!(status, 200);

    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
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

#[tokio::test]
async fn test_discover_and_execute_via_mcp_face() {
    let exa = MockStreamableBackend::start(search_tools()).await;
    let yaml = format!(
        r#"
backends:
  exa:
    transport: streamable-http
    url: "{}"
"#,
        exa.url()
    );
    let (context, url) = gateway(&yaml).await;

    // discover through the MCP tool
    let (status, body) = rpc(
        &url,
        request(
            3,
            "tools/call",
            json!({"name": "discover_tools", "arguments": {"query": "search the web"}}),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["isError"], false);
    let payload: Value =
        serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(payload["tools"][0]["tool_id"], "exa_web_search");

    // execute through the MCP tool
    let (status, body) = rpc(
        &url,
        request(
            4,
            "tools/call",
            json!({"name": "execute_tool", "arguments": {"tool_id": "exa_web_search", "arguments": {"query": "rust"}}}),
        ),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["isError"], false);
    let payload: Value =
        serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(payload["result"]["echo"]["tool"], "web_search");

    // list servers through the MCP tool
    let (_, body) = rpc(
        &url,
        request(5, "tools/call", json!({"name": "list_mcp_servers"})),
    )
    .await;
    let payload: Value =
        serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(payload["servers"][0]["name"], "exa");

    context.shutdown().await;
}

#[tokio::test]
async fn test_gateway_errors_surface_as_tool_results() {
    let (_context, url) = gateway("backends: {}").await;

    let (status, body) = rpc(
        &url,
        request(
            6,
            "tools/call",
            json!({"name": "execute_tool", "arguments": {"tool_id": "ghost_tool"}}),
        ),
    )
    .await;
    // protocol-level success; the failure is a tool result with isError
    assert_eq!(status, 200);
    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("UnknownTool"));
}

#[tokio::test]
async fn test_unknown_method_is_rpc_error() {
    let (_context, url) = gateway("backends: {}").await;

    let (status, body) = rpc(&url, request(7, "resources/list", json!({}))).await;
    assert_eq!(status, 200);
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_missing_tool_name_is_invalid_params() {
    let (_context, url) = gateway("backends: {}").await;

    let (_, body) = rpc(&url, request(8, "tools/call", json!({}))).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_get_is_method_not_allowed() {
    let (_context, url) = gateway("backends: {}").await;
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status().as_u16(), 405);
}

#[tokio::test]
async fn test_ping() {
    let (_context, url) = gateway("backends: {}").await;
    let (status, body) = rpc(&url, request(9, "ping", json!({}))).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!({}));
}
