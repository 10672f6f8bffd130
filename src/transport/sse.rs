//! SSE transport: a long-lived GET event stream carries inbound JSON-RPC
//! frames; requests go out through the paired POST endpoint the server
//! announces in its `endpoint` event.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::Value;
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    core::error::{GatewayError, GatewayResult},
    transport::{
        jsonrpc::{Frame, Notification, Request, RpcError},
        pending::RequestTracker,
        RawRpc, SessionApi, ToolDescriptor,
    },
};

/// How long to wait for the server's `endpoint` event after the stream opens.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder: feed raw chunks, get complete events back.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        // Events are separated by a blank line; normalize CRLF first.
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: String = self.buffer.drain(..boundary.end).collect();
            let block = &raw[..boundary.start];
            if let Some(event) = parse_event_block(block) {
                events.push(event);
            }
        }

        events
    }
}

struct Boundary {
    start: usize,
    end: usize,
}

fn find_event_boundary(buffer: &str) -> Option<Boundary> {
    let lf = buffer.find("\n\n").map(|i| Boundary {
        start: i,
        end: i + 2,
    });
    let crlf = buffer.find("\r\n\r\n").map(|i| Boundary {
        start: i,
        end: i + 4,
    });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

pub struct SseSession {
    backend: String,
    tracker: Arc<RequestTracker>,
    client: reqwest::Client,
    post_url: String,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SseSession {
    /// Open the event stream and wait for the paired POST endpoint.
    pub async fn connect(
        backend: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<Self> {
        let header_map = build_header_map(backend, headers)?;
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::transport(backend, format!("build HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| GatewayError::transport(backend, format!("open event stream: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::transport(
                backend,
                format!("event stream returned HTTP {}", response.status()),
            ));
        }

        let tracker = RequestTracker::new(backend);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader_handle = tokio::spawn(read_stream(
            backend.to_string(),
            url.to_string(),
            response,
            Arc::clone(&tracker),
            endpoint_tx,
        ));

        let post_url = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader_handle.abort();
                return Err(GatewayError::transport(
                    backend,
                    "event stream closed before announcing an endpoint",
                ));
            }
            Err(_elapsed) => {
                reader_handle.abort();
                return Err(GatewayError::transport(
                    backend,
                    "no endpoint event within handshake deadline",
                ));
            }
        };

        info!(backend, post_url = %post_url, "SSE session established");

        Ok(Self {
            backend: backend.to_string(),
            tracker,
            client,
            post_url,
            reader_handle: Mutex::new(Some(reader_handle)),
            closed: AtomicBool::new(false),
        })
    }

    async fn post_frame(&self, body: String) -> GatewayResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::cancelled(format!(
                "session to {} closed",
                self.backend
            )));
        }
        let response = self
            .client
            .post(&self.post_url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::transport(&self.backend, format!("POST failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::transport(
                &self.backend,
                format!("POST endpoint returned HTTP {}", response.status()),
            ));
        }
        Ok(())
    }
}

fn build_header_map(backend: &str, headers: &HashMap<String, String>) -> GatewayResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            GatewayError::config(format!("invalid header name '{}' for backend {}", key, backend))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::config(format!("invalid header value for '{}' on backend {}", key, backend))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn read_stream(
    backend: String,
    base_url: String,
    response: reqwest::Response,
    tracker: Arc<RequestTracker>,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(backend = %backend, error = %e, "SSE stream read error");
                break;
            }
        };

        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        match resolve_endpoint(&base_url, &event.data) {
                            Some(resolved) => {
                                let _ = tx.send(resolved);
                            }
                            None => warn!(
                                backend = %backend,
                                endpoint = %event.data,
                                "Could not resolve endpoint event"
                            ),
                        }
                    }
                }
                "message" => match serde_json::from_str::<Value>(&event.data)
                    .ok()
                    .and_then(Frame::from_value)
                {
                    Some(Frame::Response(response)) => tracker.complete(response),
                    Some(Frame::Notification { method, .. }) => {
                        debug!(backend = %backend, method = %method, "Ignoring backend notification");
                    }
                    Some(Frame::ServerRequest { method, .. }) => {
                        debug!(backend = %backend, method = %method, "Ignoring server request on SSE stream");
                    }
                    None => {
                        warn!(backend = %backend, "Discarding malformed SSE message payload");
                    }
                },
                other => {
                    debug!(backend = %backend, event = other, "Ignoring SSE event type");
                }
            }
        }
    }

    info!(backend = %backend, "SSE stream ended");
    tracker.fail_all();
}

fn resolve_endpoint(base_url: &str, endpoint: &str) -> Option<String> {
    let base = url::Url::parse(base_url).ok()?;
    base.join(endpoint).ok().map(|u| u.to_string())
}

#[async_trait]
impl RawRpc for SseSession {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> GatewayResult<Result<Value, RpcError>> {
        let (id, rx) = self.tracker.register();
        let request = Request::new(id, method, params);
        let body = serde_json::to_string(&request)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;

        if let Err(e) = self.post_frame(body).await {
            self.tracker.forget(id);
            return Err(e);
        }
        self.tracker.wait(id, rx, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        let notification = Notification::new(method, params);
        let body = serde_json::to_string(&notification)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;
        self.post_frame(body).await
    }
}

#[async_trait]
impl SessionApi for SseSession {
    async fn initialize(&self, timeout: Duration) -> GatewayResult<()> {
        super::mcp_initialize(self, timeout).await
    }

    async fn list_tools(&self, timeout: Duration) -> GatewayResult<Vec<ToolDescriptor>> {
        super::mcp_list_tools(self, timeout).await
    }

    async fn call_tool(&self, name: &str, args: Value, timeout: Duration) -> GatewayResult<Value> {
        super::mcp_call_tool(self, name, args, timeout).await
    }

    async fn health(&self, timeout: Duration) -> GatewayResult<()> {
        super::mcp_list_tools(self, timeout).await.map(|_| ())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.tracker.fail_all();
    }
}
