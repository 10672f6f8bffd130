//! Streamable HTTP transport: every JSON-RPC request is a POST to one
//! endpoint; the reply comes back as a plain JSON body or as a short-lived
//! event stream, negotiated by the server per response. A session id issued
//! during `initialize` is echoed on subsequent requests.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    core::error::{GatewayError, GatewayResult},
    transport::{
        jsonrpc::{Frame, IdGenerator, Notification, Request, RpcError},
        sse::SseDecoder,
        RawRpc, SessionApi, ToolDescriptor,
    },
};

const SESSION_ID_HEADER: &str = "mcp-session-id";

pub struct StreamableSession {
    backend: String,
    url: String,
    client: reqwest::Client,
    ids: IdGenerator,
    session_id: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl StreamableSession {
    pub fn new(
        backend: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> GatewayResult<Self> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                GatewayError::config(format!(
                    "invalid header name '{}' for backend {}",
                    key, backend
                ))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                GatewayError::config(format!(
                    "invalid header value for '{}' on backend {}",
                    key, backend
                ))
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::transport(backend, format!("build HTTP client: {}", e)))?;

        Ok(Self {
            backend: backend.to_string(),
            url: url.to_string(),
            client,
            ids: IdGenerator::new(),
            session_id: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(GatewayError::cancelled(format!(
                "session to {} closed",
                self.backend
            )))
        } else {
            Ok(())
        }
    }

    async fn post(&self, body: String) -> GatewayResult<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);

        if let Some(session_id) = self.session_id.read().clone() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(&self.backend, format!("POST failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::transport(
                &self.backend,
                format!("endpoint returned HTTP {}", response.status()),
            ));
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.write();
            if slot.as_deref() != Some(session_id) {
                *slot = Some(session_id.to_string());
            }
        }

        Ok(response)
    }

    /// Extract the response frame matching `id` from a completed exchange.
    async fn read_reply(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> GatewayResult<Result<Value, RpcError>> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    GatewayError::transport(&self.backend, format!("response stream: {}", e))
                })?;
                for event in decoder.push(&chunk) {
                    if event.event != "message" {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&event.data)
                        .ok()
                        .and_then(Frame::from_value)
                    {
                        Some(Frame::Response(reply)) if reply.id == id => {
                            return Ok(reply.payload);
                        }
                        Some(Frame::Response(reply)) => {
                            debug!(
                                backend = %self.backend,
                                expected = id,
                                got = reply.id,
                                "Ignoring response for a different request id"
                            );
                        }
                        Some(_) => {}
                        None => warn!(
                            backend = %self.backend,
                            "Discarding malformed frame in response stream"
                        ),
                    }
                }
            }
            Err(GatewayError::protocol(
                &self.backend,
                format!("response stream ended without a reply to request {}", id),
            ))
        } else {
            let body: Value = response.json().await.map_err(|e| {
                GatewayError::protocol(&self.backend, format!("invalid JSON response: {}", e))
            })?;
            match Frame::from_value(body) {
                Some(Frame::Response(reply)) if reply.id == id => Ok(reply.payload),
                _ => Err(GatewayError::protocol(
                    &self.backend,
                    format!("response body did not answer request {}", id),
                )),
            }
        }
    }
}

#[async_trait]
impl RawRpc for StreamableSession {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> GatewayResult<Result<Value, RpcError>> {
        self.ensure_open()?;
        let id = self.ids.next_id();
        let request = Request::new(id, method, params);
        let body = serde_json::to_string(&request)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;

        let exchange = async {
            let response = self.post(body).await?;
            self.read_reply(response, id).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GatewayError::Timeout {
                backend: self.backend.clone(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        self.ensure_open()?;
        let notification = Notification::new(method, params);
        let body = serde_json::to_string(&notification)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;
        self.post(body).await.map(|_| ())
    }
}

#[async_trait]
impl SessionApi for StreamableSession {
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
        // Best-effort session teardown; the server may not support DELETE.
        let session_id = self.session_id.read().clone();
        if let Some(session_id) = session_id {
            let request = self
                .client
                .delete(&self.url)
                .header(SESSION_ID_HEADER, session_id)
                .timeout(Duration::from_secs(2));
            if let Err(e) = request.send().await {
                debug!(backend = %self.backend, error = %e, "Session DELETE failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_header_name() {
        let headers = HashMap::from([("bad header".to_string(), "v".to_string())]);
        let result = StreamableSession::new("b", "http://localhost:1/mcp", &headers);
        assert!(matches!(result, Err(GatewayError::Config { .. })));
    }

    #[tokio::test]
    async fn test_request_after_close_is_cancelled() {
        let session =
            StreamableSession::new("b", "http://localhost:1/mcp", &HashMap::new()).unwrap();
        session.close().await;
        let err = session
            .request("tools/list", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let session =
            StreamableSession::new("b", "http://127.0.0.1:1/mcp", &HashMap::new()).unwrap();
        let err = session
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }
}
