// Mock MCP backends for integration tests.
//
// - `MockStreamableBackend`: axum server answering JSON-RPC over one POST
//   endpoint (streamable-http framing).
// - `MockSseBackend`: GET event stream announcing a POST endpoint, replies
//   delivered as `message` events.
// - `stdio_backend_script`: a shell one-liner that prints banner noise and
//   then speaks JSON-RPC on stdio, for spawning as a child process.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

/// Tool definitions a mock backend advertises.
pub fn search_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "web_search",
            "description": "Search the web for pages matching a query",
            "inputSchema": {"type": "object", "properties": {"query": {"type": "string"}}}
        }),
        json!({
            "name": "find_similar",
            "description": "Find pages similar to a given url",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
        }),
    ]
}

fn rpc_dispatch(frame: &Value, tools: &[Value]) -> Option<Value> {
    let method = frame.get("method")?.as_str()?;
    let id = frame.get("id").cloned()?;

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-backend", "version": "1.0.0"},
        }),
        "tools/list" => json!({ "tools": tools }),
        "tools/call" => {
            let name = frame
                .pointer("/params/name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let arguments = frame
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or(json!({}));
            json!({
                "content": [{"type": "text", "text": format!("executed {}", name)}],
                "echo": { "tool": name, "arguments": arguments },
            })
        }
        "ping" => json!({}),
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {}", method)},
            }));
        }
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

// ---------------------------------------------------------------------------
// Streamable HTTP mock
// ---------------------------------------------------------------------------

pub struct MockStreamableBackend {
    pub port: u16,
    handle: Option<JoinHandle<()>>,
}

impl MockStreamableBackend {
    pub async fn start(tools: Vec<Value>) -> Self {
        let tools = Arc::new(tools);

        let app = Router::new().route(
            "/mcp",
            post(move |Json(frame): Json<Value>| {
                let tools = Arc::clone(&tools);
                async move {
                    match rpc_dispatch(&frame, &tools) {
                        Some(reply) => (
                            StatusCode::OK,
                            [(header::HeaderName::from_static("mcp-session-id"), "mock-1")],
                            Json(reply),
                        )
                            .into_response(),
                        // notification
                        None => StatusCode::ACCEPTED.into_response(),
                    }
                }
            })
            .delete(|| async { StatusCode::OK }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock backend");
        });

        Self {
            port,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/mcp", self.port)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for MockStreamableBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// SSE mock
// ---------------------------------------------------------------------------

type EventSender = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

pub struct MockSseBackend {
    pub port: u16,
    handle: Option<JoinHandle<()>>,
}

impl MockSseBackend {
    pub async fn start(tools: Vec<Value>) -> Self {
        let tools = Arc::new(tools);
        let sender: EventSender = Arc::new(Mutex::new(None));

        let stream_sender = Arc::clone(&sender);
        let sse_route = get(move || {
            let sender = Arc::clone(&stream_sender);
            async move {
                let (tx, rx) = mpsc::unbounded_channel::<String>();
                tx.send("event: endpoint\ndata: /messages\n\n".to_string())
                    .expect("endpoint event");
                *sender.lock() = Some(tx);

                let body = Body::from_stream(
                    UnboundedReceiverStream::new(rx)
                        .map(|chunk| Ok::<_, Infallible>(chunk.into_bytes())),
                );
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(body)
                    .unwrap()
            }
        });

        let post_sender = Arc::clone(&sender);
        let messages_route = post(move |Json(frame): Json<Value>| {
            let sender = Arc::clone(&post_sender);
            let tools = Arc::clone(&tools);
            async move {
                if let Some(reply) = rpc_dispatch(&frame, &tools) {
                    if let Some(tx) = sender.lock().as_ref() {
                        let _ = tx.send(format!("event: message\ndata: {}\n\n", reply));
                    }
                }
                StatusCode::ACCEPTED
            }
        });

        let app = Router::new()
            .route("/sse", sse_route)
            .route("/messages", messages_route);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock sse backend");
        });

        Self {
            port,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/sse", self.port)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for MockSseBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Stdio mock
// ---------------------------------------------------------------------------

/// A stdio MCP backend as a shell script: prints `banner_lines` of noise
/// first, then answers initialize / tools/list / tools/call by extracting the
/// request id with sed. Calling the tool named `die` makes the process write
/// `kill_flag` (if given) and exit, and the flag prevents respawns from
/// serving again.
pub fn stdio_backend_script(
    banner_lines: usize,
    tools_json: &str,
    kill_flag: Option<&str>,
) -> String {
    let mut script = String::new();

    if let Some(flag) = kill_flag {
        script.push_str(&format!("[ -e '{}' ] && exit 0\n", flag));
    }
    for i in 0..banner_lines {
        script.push_str(&format!("echo 'mock backend banner line {}'\n", i + 1));
    }

    let die_handler = match kill_flag {
        Some(flag) => format!("touch '{}'; exit 0", flag),
        None => "exit 0".to_string(),
    };

    script.push_str(&format!(
        r#"while read line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"mock","version":"1.0"}}}}}}\n' "$id" ;;
    *'"tools/list"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":{tools}}}}}\n' "$id" ;;
    *'"name":"die"'*)
      {die} ;;
    *'"tools/call"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"done"}}],"status":"ok"}}}}\n' "$id" ;;
    *) ;;
  esac
done
"#,
        tools = tools_json,
        die = die_handler,
    ));

    script
}

/// Tool list JSON for the puppeteer-flavored stdio mock.
pub fn puppeteer_tools_json() -> &'static str {
    r#"[{"name":"screenshot","description":"Take a screenshot of the current page","inputSchema":{"type":"object","properties":{"name":{"type":"string"}}}},{"name":"navigate","description":"Navigate the browser to a url","inputSchema":{"type":"object","properties":{"url":{"type":"string"}}}},{"name":"die","description":"Shut the backend down","inputSchema":{"type":"object"}}]"#
}
