//! Stdio transport: spawns the backend as a child process and speaks
//! newline-delimited JSON-RPC over its stdin/stdout.
//!
//! Many servers print banner text to stdout before their first frame; those
//! lines are logged and discarded, never treated as errors. Shutdown closes
//! stdin, sends SIGTERM, and escalates to SIGKILL after a grace period.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    core::error::{GatewayError, GatewayResult},
    transport::{
        jsonrpc::{self, Frame, Notification, Request, RpcError},
        pending::RequestTracker,
        RawRpc, SessionApi, ToolDescriptor,
    },
};

/// How long a child may keep running after SIGTERM before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct StdioSession {
    backend: String,
    tracker: Arc<RequestTracker>,
    writer_tx: Mutex<Option<mpsc::Sender<String>>>,
    child: Mutex<Option<Child>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    stderr_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StdioSession {
    /// Spawn the configured command and wire up the duplex.
    pub async fn spawn(
        backend: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> GatewayResult<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GatewayError::transport(backend, format!("failed to spawn '{}': {}", command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::transport(backend, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::transport(backend, "child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::transport(backend, "child stderr unavailable"))?;

        let tracker = RequestTracker::new(backend);
        let (writer_tx, writer_rx) = mpsc::channel::<String>(64);

        let writer_handle = tokio::spawn(write_loop(backend.to_string(), stdin, writer_rx));
        let reader_handle = tokio::spawn(read_loop(
            backend.to_string(),
            stdout,
            Arc::clone(&tracker),
            writer_tx.clone(),
        ));
        let stderr_handle = tokio::spawn(stderr_loop(backend.to_string(), stderr));

        info!(backend, command, "Spawned stdio backend");

        Ok(Self {
            backend: backend.to_string(),
            tracker,
            writer_tx: Mutex::new(Some(writer_tx)),
            child: Mutex::new(Some(child)),
            reader_handle: Mutex::new(Some(reader_handle)),
            writer_handle: Mutex::new(Some(writer_handle)),
            stderr_handle: Mutex::new(Some(stderr_handle)),
            closed: AtomicBool::new(false),
        })
    }

    async fn send_line(&self, line: String) -> GatewayResult<()> {
        let guard = self.writer_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| GatewayError::cancelled(format!("session to {} closed", self.backend)))?;
        tx.send(line)
            .await
            .map_err(|_| GatewayError::transport(&self.backend, "child stdin closed"))
    }
}

async fn write_loop(backend: String, mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        let mut payload = line.into_bytes();
        payload.push(b'\n');
        if let Err(e) = stdin.write_all(&payload).await {
            warn!(backend = %backend, error = %e, "Failed to write to child stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(backend = %backend, error = %e, "Failed to flush child stdin");
            break;
        }
    }
    // rx closed or write failed: dropping stdin signals EOF to the child
}

async fn read_loop(
    backend: String,
    stdout: ChildStdout,
    tracker: Arc<RequestTracker>,
    writer_tx: mpsc::Sender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut handshake_done = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Frame::parse_line(&line) {
                Some(frame) => {
                    handshake_done = true;
                    dispatch_frame(&backend, frame, &tracker, &writer_tx).await;
                }
                None => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if handshake_done {
                        warn!(backend = %backend, line = %line, "Discarding non-JSON stdout line");
                    } else {
                        debug!(backend = %backend, line = %line, "Discarding stdout banner line");
                    }
                }
            },
            Ok(None) => {
                info!(backend = %backend, "Backend stdout closed");
                break;
            }
            Err(e) => {
                warn!(backend = %backend, error = %e, "Error reading backend stdout");
                break;
            }
        }
    }

    tracker.fail_all();
}

async fn dispatch_frame(
    backend: &str,
    frame: Frame,
    tracker: &RequestTracker,
    writer_tx: &mpsc::Sender<String>,
) {
    match frame {
        Frame::Response(response) => tracker.complete(response),
        Frame::ServerRequest { id, method, .. } => {
            let reply = if method == "ping" {
                jsonrpc::server_reply(&id, serde_json::json!({}))
            } else {
                debug!(backend, method = %method, "Rejecting unsupported server request");
                jsonrpc::server_error_reply(&id, jsonrpc::METHOD_NOT_FOUND, "method not supported")
            };
            let _ = writer_tx.send(reply.to_string()).await;
        }
        Frame::Notification { method, .. } => {
            debug!(backend, method = %method, "Ignoring backend notification");
        }
    }
}

async fn stderr_loop(backend: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(backend = %backend, "stderr: {}", line);
    }
}

#[async_trait]
impl RawRpc for StdioSession {
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
        let line = serde_json::to_string(&request)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;

        if let Err(e) = self.send_line(line).await {
            self.tracker.forget(id);
            return Err(e);
        }
        self.tracker.wait(id, rx, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        let notification = Notification::new(method, params);
        let line = serde_json::to_string(&notification)
            .map_err(|e| GatewayError::protocol(&self.backend, e.to_string()))?;
        self.send_line(line).await
    }
}

#[async_trait]
impl SessionApi for StdioSession {
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

        // Close stdin first: drop every sender so the write loop exits and
        // releases the pipe, giving the child a chance to exit on its own.
        self.writer_tx.lock().await.take();
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.writer_handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                debug!(backend = %self.backend, "Writer task did not drain before termination");
            }
        }

        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            terminate_child(&self.backend, &mut child).await;
        }
        drop(child_guard);

        self.tracker.fail_all();

        if let Some(handle) = self.stderr_handle.lock().await.take() {
            handle.abort();
        }
    }
}

async fn terminate_child(backend: &str, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first; SIGKILL only after the grace period.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(backend, %status, "Backend process exited after SIGTERM");
                return;
            }
            Ok(Err(e)) => {
                warn!(backend, error = %e, "Failed to await backend process");
                return;
            }
            Err(_elapsed) => {
                warn!(backend, "Backend ignored SIGTERM, escalating to SIGKILL");
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!(backend, error = %e, "Failed to kill backend process");
    } else {
        info!(backend, "Backend process killed");
    }
}
