//! In-flight request tracking shared by all transport adapters.
//!
//! Each outbound request registers a oneshot waiter keyed by its JSON-RPC id.
//! The session's reader task completes waiters as responses arrive; `fail_all`
//! flushes every waiter when the session dies or closes.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    core::error::{GatewayError, GatewayResult},
    transport::jsonrpc::{IdGenerator, Response, RpcError},
};

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

/// Pending-request map with monotonic id allocation.
#[derive(Debug)]
pub struct RequestTracker {
    backend: String,
    ids: IdGenerator,
    pending: DashMap<u64, Waiter>,
}

impl RequestTracker {
    pub fn new(backend: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            backend: backend.into(),
            ids: IdGenerator::new(),
            pending: DashMap::new(),
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Allocate an id and register its waiter.
    pub fn register(&self) -> (u64, oneshot::Receiver<Result<Value, RpcError>>) {
        let id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Route a response to its waiter. Unmatched ids are ignored (the waiter
    /// may have timed out already).
    pub fn complete(&self, response: Response) {
        if let Some((_, tx)) = self.pending.remove(&response.id) {
            let _ = tx.send(response.payload);
        } else {
            tracing::debug!(
                backend = %self.backend,
                id = response.id,
                "Dropping response for unknown or expired request id"
            );
        }
    }

    /// Drop a waiter without completing it (timeout path).
    pub fn forget(&self, id: u64) {
        self.pending.remove(&id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every in-flight request. Dropping the sender makes the receiver
    /// resolve with a channel error which callers surface per `reason`.
    pub fn fail_all(&self) {
        self.pending.clear();
    }

    /// Await a registered waiter with a deadline.
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<Value, RpcError>>,
        timeout: Duration,
    ) -> GatewayResult<Result<Value, RpcError>> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_closed)) => Err(GatewayError::cancelled(format!(
                "session to backend {} closed while request {} was in flight",
                self.backend, id
            ))),
            Err(_elapsed) => {
                self.forget(id);
                Err(GatewayError::Timeout {
                    backend: self.backend.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let tracker = RequestTracker::new("demo");
        let (id, rx) = tracker.register();

        tracker.complete(Response {
            id,
            payload: Ok(serde_json::json!({"ok": true})),
        });

        let result = tracker
            .wait(id, rx, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_forgets_waiter() {
        let tracker = RequestTracker::new("demo");
        let (id, rx) = tracker.register();

        let err = tracker
            .wait(id, rx, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert_eq!(tracker.pending_count(), 0);

        // A late response for the expired id is silently dropped.
        tracker.complete(Response {
            id,
            payload: Ok(Value::Null),
        });
    }

    #[tokio::test]
    async fn test_fail_all_cancels_waiters() {
        let tracker = RequestTracker::new("demo");
        let (id, rx) = tracker.register();
        let (_id2, _rx2) = tracker.register();

        tracker.fail_all();
        assert_eq!(tracker.pending_count(), 0);

        let err = tracker
            .wait(id, rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_error_payload_passes_through() {
        let tracker = RequestTracker::new("demo");
        let (id, rx) = tracker.register();

        tracker.complete(Response {
            id,
            payload: Err(RpcError {
                code: -32000,
                message: "backend refused".to_string(),
                data: None,
            }),
        });

        let payload = tracker.wait(id, rx, Duration::from_secs(1)).await.unwrap();
        let err = payload.unwrap_err();
        assert_eq!(err.code, -32000);
    }
}
