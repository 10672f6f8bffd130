//! Backend session ownership: connect, enumerate, publish tools, route tool
//! calls, watch health, and recover from failures.
//!
//! Each backend gets its own session plus background health and reconnect
//! tasks. Tasks carry a generation number so a reconnect or removal
//! invalidates stale loops instead of racing them.

pub mod tool_filter;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::{BackendConfig, GatewaySettings, TransportConfig},
    core::{
        backoff::{BackoffCalculator, BackoffConfig},
        circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
        error::{GatewayError, GatewayResult},
    },
    registry::{Tool, ToolRegistry},
    transport::{Session, ToolDescriptor, INITIALIZE_TIMEOUT},
};

/// Bounded drain period for closing all sessions on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Consecutive health probe failures before a backend is marked unhealthy.
const HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Keyword list used to derive tags from tool descriptions.
const TAG_KEYWORDS: &[&str] = &[
    "search",
    "web",
    "browser",
    "file",
    "code",
    "api",
    "data",
    "screenshot",
    "navigation",
    "read",
    "write",
    "documentation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Observable per-backend state, served by the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    pub last_seen: Option<String>,
    pub error_message: Option<String>,
    pub tool_count: usize,
    pub health_status: HealthStatus,
    pub last_health_check: Option<String>,
}

impl ServerStatus {
    fn new(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            connected: false,
            last_seen: None,
            error_message: None,
            tool_count: 0,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
        }
    }
}

struct BackendHandle {
    name: String,
    config: RwLock<BackendConfig>,
    session: RwLock<Option<Arc<Session>>>,
    status: RwLock<ServerStatus>,
    breaker: CircuitBreaker,
    /// Bumped on every (re)connect and removal; stale tasks observe and exit.
    generation: AtomicU64,
    reconnecting: AtomicBool,
    /// Serializes connect attempts so reconcile and the reconnect loop never
    /// establish two sessions for one backend.
    connect_lock: tokio::sync::Mutex<()>,
}

impl BackendHandle {
    fn new(name: &str, config: BackendConfig, breaker_config: CircuitBreakerConfig) -> Self {
        let enabled = config.enabled;
        Self {
            name: name.to_string(),
            config: RwLock::new(config),
            session: RwLock::new(None),
            status: RwLock::new(ServerStatus::new(name, enabled)),
            breaker: CircuitBreaker::with_config(breaker_config),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn take_session(&self) -> Option<Arc<Session>> {
        self.session.write().take()
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }
}

/// Owns every backend session and its lifecycle.
pub struct ClientManager {
    registry: Arc<ToolRegistry>,
    backends: DashMap<String, Arc<BackendHandle>>,
    desired: RwLock<BTreeMap<String, BackendConfig>>,
    settings: GatewaySettings,
    reconcile_lock: tokio::sync::Mutex<()>,
    http: reqwest::Client,
}

impl ClientManager {
    pub fn new(registry: Arc<ToolRegistry>, settings: GatewaySettings) -> Arc<Self> {
        Arc::new(Self {
            registry,
            backends: DashMap::new(),
            desired: RwLock::new(BTreeMap::new()),
            settings,
            reconcile_lock: tokio::sync::Mutex::new(()),
            http: reqwest::Client::new(),
        })
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    /// The currently committed desired backend set.
    pub fn desired_backends(&self) -> BTreeMap<String, BackendConfig> {
        self.desired.read().clone()
    }

    fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_errors_per_minute: self.settings.max_errors_per_minute,
            ..Default::default()
        }
    }

    fn request_timeout(&self, config: &BackendConfig) -> Duration {
        Duration::from_secs(
            config
                .options
                .timeout_s
                .unwrap_or(self.settings.connection_timeout_s),
        )
    }

    fn handshake_timeout(&self, config: &BackendConfig) -> Duration {
        INITIALIZE_TIMEOUT.max(self.request_timeout(config))
    }

    // ------------------------------------------------------------------
    // Reconcile
    // ------------------------------------------------------------------

    /// Apply a desired backend set: add missing, remove extras, reconnect
    /// entries whose transport changed, leave the rest untouched. Serialized
    /// so overlapping updates land in arrival order.
    pub async fn reconcile(self: &Arc<Self>, desired: BTreeMap<String, BackendConfig>) {
        let _guard = self.reconcile_lock.lock().await;

        let previous = {
            let mut committed = self.desired.write();
            let previous = committed.clone();
            *committed = desired.clone();
            previous
        };

        // removals
        let removed: Vec<String> = previous
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in &removed {
            self.remove_backend(name).await;
        }

        // additions and changes
        let mut connect_tasks = Vec::new();
        for (name, config) in &desired {
            match previous.get(name) {
                None => {
                    info!(backend = %name, transport = config.transport.kind(), "Adding backend");
                    let handle = Arc::new(BackendHandle::new(
                        name,
                        config.clone(),
                        self.breaker_config(),
                    ));
                    self.backends.insert(name.clone(), Arc::clone(&handle));
                    if config.enabled {
                        connect_tasks.push(self.clone().connect_and_publish(handle));
                    }
                }
                Some(old) if config.requires_reconnect(old) => {
                    info!(backend = %name, "Backend changed, reconnecting");
                    if let Some(handle) = self.backends.get(name).map(|h| Arc::clone(h.value())) {
                        handle.bump_generation();
                        if let Some(session) = handle.take_session() {
                            session.close().await;
                        }
                        self.registry.remove_server(name);
                        *handle.config.write() = config.clone();
                        {
                            let mut status = handle.status.write();
                            status.enabled = config.enabled;
                            status.connected = false;
                            status.tool_count = 0;
                        }
                        if config.enabled {
                            connect_tasks.push(self.clone().connect_and_publish(handle));
                        } else {
                            handle.status.write().health_status = HealthStatus::Unknown;
                        }
                    }
                }
                Some(_) => {
                    // only filter/health/options changed; swap config in place
                    if let Some(handle) = self.backends.get(name) {
                        *handle.config.write() = config.clone();
                    }
                }
            }
        }

        join_all(connect_tasks).await;
    }

    async fn remove_backend(&self, name: &str) {
        if let Some((_, handle)) = self.backends.remove(name) {
            info!(backend = %name, "Removing backend");
            handle.bump_generation();
            if let Some(session) = handle.take_session() {
                session.close().await;
            }
        }
        self.registry.remove_server(name);
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    /// Connect a single backend and publish its tools. Used by reconcile and
    /// by the reconnect loop; failures are recorded on the status row.
    async fn connect_and_publish(self: Arc<Self>, handle: Arc<BackendHandle>) {
        let generation = handle.bump_generation();
        match self.attempt_connect(&handle).await {
            Ok(tool_count) => {
                handle.breaker.record_success();
                info!(
                    backend = %handle.name,
                    tool_count,
                    "Backend connected and enumerated"
                );
                self.clone().spawn_health_loop(handle, generation);
            }
            Err(e) => {
                warn!(backend = %handle.name, error = %e, "Backend connect failed");
                handle.breaker.record_failure();
                {
                    let mut status = handle.status.write();
                    status.connected = false;
                    status.health_status = HealthStatus::Unhealthy;
                    status.error_message = Some(e.to_string());
                }
                self.spawn_reconnect_loop(handle);
            }
        }
    }

    async fn attempt_connect(&self, handle: &BackendHandle) -> GatewayResult<usize> {
        let _connect_guard = handle.connect_lock.lock().await;
        if handle.session().is_some() {
            // another path connected while we waited
            return Ok(handle.status.read().tool_count);
        }

        let config = handle.config.read().clone();
        let session = Session::connect(&handle.name, &config).await?;

        let handshake = self.handshake_timeout(&config);
        if let Err(e) = session.initialize(handshake).await {
            session.close().await;
            return Err(e);
        }

        let descriptors = match session.list_tools(self.request_timeout(&config)).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let tools = convert_tools(&handle.name, &config, descriptors);
        let tool_count = tools.len();
        self.registry.replace_server(&handle.name, tools);

        *handle.session.write() = Some(Arc::new(session));
        {
            let mut status = handle.status.write();
            status.enabled = config.enabled;
            status.connected = true;
            status.last_seen = Some(Utc::now().to_rfc3339());
            status.error_message = None;
            status.tool_count = tool_count;
            status.health_status = HealthStatus::Healthy;
        }

        Ok(tool_count)
    }

    /// Close one backend's session and clear its published state, keeping
    /// the backend registered.
    pub async fn disconnect(&self, name: &str) -> GatewayResult<()> {
        let handle = self
            .backends
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| GatewayError::NotConnected {
                backend: name.to_string(),
            })?;

        handle.bump_generation();
        if let Some(session) = handle.take_session() {
            session.close().await;
        }
        self.registry.remove_server(name);
        {
            let mut status = handle.status.write();
            status.connected = false;
            status.tool_count = 0;
            status.health_status = HealthStatus::Unknown;
            status.error_message = None;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Route a tool call to the owning backend session.
    pub async fn call(self: &Arc<Self>, server: &str, tool: &str, args: Value) -> GatewayResult<Value> {
        let handle = self
            .backends
            .get(server)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| GatewayError::NotConnected {
                backend: server.to_string(),
            })?;

        let session = handle.session().ok_or_else(|| GatewayError::NotConnected {
            backend: server.to_string(),
        })?;

        let config = handle.config.read().clone();
        let timeout = self.request_timeout(&config);
        let generation = handle.current_generation();

        match session.call_tool(tool, args, timeout).await {
            Ok(result) => {
                handle.breaker.record_success();
                handle.status.write().last_seen = Some(Utc::now().to_rfc3339());
                Ok(result)
            }
            Err(e) => {
                if e.is_backend_fault() {
                    handle.breaker.record_failure();
                }
                // A dead transport needs a reconnect; a timeout leaves the
                // session healthy per the cancellation contract.
                if matches!(
                    e,
                    GatewayError::Transport { .. } | GatewayError::Protocol { .. }
                ) {
                    {
                        let mut status = handle.status.write();
                        status.health_status = HealthStatus::Unhealthy;
                        status.error_message = Some(e.to_string());
                    }
                    self.trigger_reconnect(&handle, generation).await;
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn statuses(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> = self
            .backends
            .iter()
            .map(|entry| entry.value().status.read().clone())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.backends.get(name).map(|h| h.status.read().clone())
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.backends
            .get(name)
            .map(|h| h.status.read().connected)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    fn spawn_health_loop(self: Arc<Self>, handle: Arc<BackendHandle>, generation: u64) {
        let config = handle.config.read().clone();
        if !config.health.enabled {
            return;
        }
        let interval = Duration::from_secs(
            config
                .health
                .interval_s
                .unwrap_or(self.settings.health_check_interval_s)
                .max(1),
        );

        tokio::spawn(async move {
            let mut failures: u32 = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                if handle.current_generation() != generation {
                    return;
                }

                match self.probe(&handle).await {
                    Ok(()) => {
                        failures = 0;
                        let mut status = handle.status.write();
                        status.health_status = HealthStatus::Healthy;
                        status.last_health_check = Some(Utc::now().to_rfc3339());
                    }
                    Err(e) => {
                        failures += 1;
                        debug!(
                            backend = %handle.name,
                            failures,
                            error = %e,
                            "Health probe failed"
                        );
                        {
                            let mut status = handle.status.write();
                            status.last_health_check = Some(Utc::now().to_rfc3339());
                            if failures >= HEALTH_FAILURE_THRESHOLD {
                                status.health_status = HealthStatus::Unhealthy;
                                status.error_message = Some(e.to_string());
                            }
                        }
                        if failures >= HEALTH_FAILURE_THRESHOLD {
                            warn!(
                                backend = %handle.name,
                                "Backend unhealthy after {} failed probes",
                                failures
                            );
                            self.trigger_reconnect(&handle, generation).await;
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn probe(&self, handle: &BackendHandle) -> GatewayResult<()> {
        let config = handle.config.read().clone();
        let timeout = Duration::from_secs(
            config
                .health
                .timeout_s
                .unwrap_or(self.settings.connection_timeout_s)
                .max(1),
        );

        // HTTP backends may expose a dedicated health endpoint; everything
        // else answers a tools/list probe.
        if let (TransportConfig::Sse { url, .. }, Some(endpoint)) =
            (&config.transport, &config.health.endpoint)
        {
            let probe_url = url::Url::parse(url)
                .and_then(|base| base.join(endpoint))
                .map_err(|e| GatewayError::config(format!("health endpoint: {}", e)))?;
            let response = self
                .http
                .get(probe_url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| GatewayError::transport(&handle.name, e.to_string()))?;
            if response.status().is_success() {
                return Ok(());
            }
            return Err(GatewayError::transport(
                &handle.name,
                format!("health endpoint returned HTTP {}", response.status()),
            ));
        }

        let session = handle.session().ok_or_else(|| GatewayError::NotConnected {
            backend: handle.name.clone(),
        })?;
        session.health(timeout).await
    }

    /// Kick off a reconnect loop unless one is already running or the handle
    /// has moved past `generation`.
    async fn trigger_reconnect(self: &Arc<Self>, handle: &Arc<BackendHandle>, generation: u64) {
        if handle.current_generation() != generation {
            return;
        }
        handle.bump_generation();
        if let Some(session) = handle.take_session() {
            session.close().await;
        }
        handle.status.write().connected = false;
        self.clone().spawn_reconnect_loop(Arc::clone(handle));
    }

    fn spawn_reconnect_loop(self: Arc<Self>, handle: Arc<BackendHandle>) {
        if handle.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            let retry_count = {
                let config = handle.config.read();
                config.options.retry_count
            };
            let backoff = BackoffConfig {
                attempts_per_incident: retry_count.max(1),
                ..Default::default()
            };

            let mut attempt: u32 = 0;
            loop {
                let delay = BackoffCalculator::delay_for_attempt(&backoff, attempt);
                tokio::time::sleep(delay).await;

                // stop when the backend is gone, disabled, or connected by
                // another path (a reconcile, typically)
                if !self.backends.contains_key(&handle.name) || !handle.config.read().enabled {
                    handle.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                if handle.session().is_some() {
                    handle.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }

                // circuit open: wait out the throttle before attempting
                if let Some(remaining) = handle.breaker.open_remaining() {
                    debug!(
                        backend = %handle.name,
                        remaining_ms = remaining.as_millis() as u64,
                        "Circuit open, delaying reconnect"
                    );
                    tokio::time::sleep(remaining).await;
                }

                info!(backend = %handle.name, attempt, "Reconnecting backend");
                match self.attempt_connect(&handle).await {
                    Ok(tool_count) => {
                        handle.breaker.record_success();
                        handle.reconnecting.store(false, Ordering::SeqCst);
                        info!(
                            backend = %handle.name,
                            tool_count,
                            "Backend reconnected"
                        );
                        let next_generation = handle.bump_generation();
                        self.clone().spawn_health_loop(handle, next_generation);
                        return;
                    }
                    Err(e) => {
                        handle.breaker.record_failure();
                        warn!(
                            backend = %handle.name,
                            attempt,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                        handle.status.write().error_message = Some(e.to_string());
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close every session in parallel with a bounded drain period.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<BackendHandle>> = self
            .backends
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let closes = handles.into_iter().filter_map(|handle| {
            handle.bump_generation();
            handle.take_session().map(|session| async move {
                session.close().await;
            })
        });

        if tokio::time::timeout(SHUTDOWN_DRAIN, join_all(closes))
            .await
            .is_err()
        {
            warn!("Session drain exceeded {}s, abandoning", SHUTDOWN_DRAIN.as_secs());
        }
        self.backends.clear();
    }
}

// ----------------------------------------------------------------------
// Descriptor conversion
// ----------------------------------------------------------------------

/// Filter and convert enumerated descriptors into registry records.
fn convert_tools(
    server: &str,
    config: &BackendConfig,
    descriptors: Vec<ToolDescriptor>,
) -> Vec<Tool> {
    descriptors
        .into_iter()
        .filter(|d| {
            let keep = tool_filter::tool_allowed(&config.tool_filter, &d.name);
            if !keep {
                debug!(backend = %server, tool = %d.name, "Tool removed by filter");
            }
            keep
        })
        .map(|d| {
            let tokens = estimate_tokens(&d);
            let tags = derive_tags(&d.description, &config.tags);
            Tool::new(server, d.name, d.description, d.input_schema, tags, tokens)
        })
        .collect()
}

/// Token cost heuristic: flat overhead plus ~4 characters per token across
/// the description and serialized schema.
fn estimate_tokens(descriptor: &ToolDescriptor) -> u32 {
    let schema_len = serde_json::to_string(&descriptor.input_schema)
        .map(|s| s.len())
        .unwrap_or(0);
    let desc_tokens = descriptor.description.len().div_ceil(4);
    let schema_tokens = schema_len.div_ceil(4);
    (50 + desc_tokens + schema_tokens + 20) as u32
}

/// Keyword tags from the description, merged with configured backend tags.
fn derive_tags(description: &str, configured: &[String]) -> Vec<String> {
    let lowered = description.to_lowercase();
    let mut tags: Vec<String> = TAG_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect();
    if lowered.contains("docs") && !tags.iter().any(|t| t == "documentation") {
        tags.push("documentation".to_string());
    }
    for tag in configured {
        let tag = tag.to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags.sort();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterMode, ToolFilterConfig};

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    fn stdio_config() -> BackendConfig {
        serde_yaml::from_str(
            r#"
transport: stdio
command: "echo"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_estimate_tokens_floor() {
        let d = descriptor("t", "");
        let tokens = estimate_tokens(&d);
        // 50 base + 20 + ceil(schema/4), never below the overhead
        assert!(tokens >= 70);
    }

    #[test]
    fn test_estimate_tokens_scales_with_description() {
        let short = estimate_tokens(&descriptor("t", "short"));
        let long = estimate_tokens(&descriptor("t", &"long description ".repeat(50)));
        assert!(long > short);
        let expected_delta = ("long description ".repeat(50).len() as u32).div_ceil(4)
            - ("short".len() as u32).div_ceil(4);
        assert_eq!(long - short, expected_delta);
    }

    #[test]
    fn test_derive_tags_from_description() {
        let tags = derive_tags("Search the web and take a screenshot", &[]);
        assert!(tags.contains(&"search".to_string()));
        assert!(tags.contains(&"web".to_string()));
        assert!(tags.contains(&"screenshot".to_string()));
        assert!(!tags.contains(&"file".to_string()));
    }

    #[test]
    fn test_derive_tags_merges_configured() {
        let tags = derive_tags("read a file", &["Custom".to_string(), "file".to_string()]);
        assert!(tags.contains(&"custom".to_string()));
        assert_eq!(tags.iter().filter(|t| *t == "file").count(), 1);
    }

    #[test]
    fn test_derive_tags_docs_alias() {
        let tags = derive_tags("fetch up-to-date docs for a library", &[]);
        assert!(tags.contains(&"documentation".to_string()));
    }

    #[test]
    fn test_derive_tags_sorted_and_deduped() {
        let tags = derive_tags("write code to read data", &[]);
        let mut sorted = tags.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_convert_applies_deny_filter() {
        let mut config = stdio_config();
        config.tool_filter = ToolFilterConfig {
            mode: FilterMode::Deny,
            list: vec!["*screenshot*".to_string()],
        };

        let tools = convert_tools(
            "puppeteer",
            &config,
            vec![
                descriptor("screenshot", "Take a screenshot"),
                descriptor("navigate", "Navigate to a URL"),
            ],
        );
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["navigate"]);
    }

    #[test]
    fn test_convert_builds_qualified_ids() {
        let tools = convert_tools(
            "exa",
            &stdio_config(),
            vec![descriptor("web_search", "Search the web")],
        );
        assert_eq!(tools[0].id, "exa_web_search");
        assert_eq!(tools[0].server, "exa");
        assert_eq!(tools[0].name, "web_search");
    }

    #[tokio::test]
    async fn test_call_unknown_backend_is_not_connected() {
        let manager = ClientManager::new(
            Arc::new(ToolRegistry::new()),
            GatewaySettings::default(),
        );
        let err = manager
            .call("ghost", "tool", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_registers_disabled_backend_without_connecting() {
        let manager = ClientManager::new(
            Arc::new(ToolRegistry::new()),
            GatewaySettings::default(),
        );
        let mut config = stdio_config();
        config.enabled = false;

        let mut desired = BTreeMap::new();
        desired.insert("off".to_string(), config);
        manager.reconcile(desired).await;

        let status = manager.status("off").expect("status row exists");
        assert!(!status.enabled);
        assert!(!status.connected);
        assert_eq!(status.health_status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_reconcile_removal_clears_registry() {
        let registry = Arc::new(ToolRegistry::new());
        let manager = ClientManager::new(Arc::clone(&registry), GatewaySettings::default());

        let mut desired = BTreeMap::new();
        let mut config = stdio_config();
        config.enabled = false;
        desired.insert("a".to_string(), config);
        manager.reconcile(desired).await;
        assert!(manager.status("a").is_some());

        // simulate published tools, then remove the backend
        registry.replace_server(
            "a",
            vec![Tool::new(
                "a",
                "t",
                "",
                serde_json::json!({}),
                vec![],
                10,
            )],
        );
        manager.reconcile(BTreeMap::new()).await;
        assert!(manager.status("a").is_none());
        assert!(registry.get("a_t").is_none());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_desired_set() {
        let manager = ClientManager::new(
            Arc::new(ToolRegistry::new()),
            GatewaySettings::default(),
        );
        let mut config = stdio_config();
        config.enabled = false;

        let mut desired = BTreeMap::new();
        desired.insert("one".to_string(), config.clone());
        manager.reconcile(desired.clone()).await;
        assert_eq!(manager.desired_backends(), desired);

        desired.insert("two".to_string(), config);
        manager.reconcile(desired.clone()).await;
        assert_eq!(manager.desired_backends(), desired);
    }
}
