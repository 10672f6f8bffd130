//! HTTP surface assembly and process startup.
//!
//! Handlers are thin delegates into the proxy service; the REST face and the
//! MCP endpoint share the same [`GatewayContext`] state.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::{signal, spawn};
use tracing::{info, warn};

use crate::{
    app_context::GatewayContext,
    config::GatewayConfig,
    core::error::GatewayError,
    mcp,
    observability::logging::{self, parse_level, LoggingConfig},
    protocols::{DiscoverRequest, ExecuteRequest, ProvisionRequest, RegisterServerRequest},
    version, watcher,
};

/// How many successive ports to probe when the configured one is taken and
/// the operator did not pin it explicitly.
const PORT_PROBE_RANGE: u16 = 24;

/// Grace period for in-flight requests during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct ServerConfig {
    pub config: GatewayConfig,
    /// Path of the loaded config file, if any (enables the watcher)
    pub config_path: Option<PathBuf>,
    /// Raw file content at startup; seeds the watcher's change detector
    pub config_raw: Option<String>,
    /// Whether the port came from an explicit `PORT`/CLI override
    pub port_explicit: bool,
    pub log_dir: Option<String>,
}

fn error_response(err: &GatewayError) -> Response {
    (
        err.status_code(),
        Json(json!({ "detail": format!("{}: {}", err.code(), err) })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(context): State<Arc<GatewayContext>>) -> Response {
    Json(json!({
        "status": "healthy",
        "uptime_s": context.uptime_s(),
        "version": version::VERSION,
    }))
    .into_response()
}

async fn list_servers(State(context): State<Arc<GatewayContext>>) -> Response {
    Json(context.proxy.list_servers()).into_response()
}

async fn get_server(
    State(context): State<Arc<GatewayContext>>,
    Path(name): Path<String>,
) -> Response {
    match context.proxy.server_status(&name) {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn register_server(
    State(context): State<Arc<GatewayContext>>,
    Json(body): Json<RegisterServerRequest>,
) -> Response {
    match context.proxy.register_server(&body.name, body.config).await {
        Ok(status) => (StatusCode::CREATED, Json(status)).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn remove_server(
    State(context): State<Arc<GatewayContext>>,
    Path(name): Path<String>,
) -> Response {
    match context.proxy.remove_server(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn discover_tools(
    State(context): State<Arc<GatewayContext>>,
    Json(body): Json<DiscoverRequest>,
) -> Response {
    match context.proxy.discover_tools(
        &body.query,
        body.context.as_deref(),
        &body.tags,
        body.limit,
    ) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn provision_tools(
    State(context): State<Arc<GatewayContext>>,
    Json(body): Json<ProvisionRequest>,
) -> Response {
    match context.proxy.provision_tools(
        body.tool_ids.as_deref(),
        body.max_tools,
        body.context_tokens,
    ) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn execute_tool(
    State(context): State<Arc<GatewayContext>>,
    Json(body): Json<ExecuteRequest>,
) -> Response {
    let arguments = body.arguments.unwrap_or_else(|| json!({}));
    match context.proxy.execute_tool(&body.tool_id, arguments).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn sink_handler() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

// ---------------------------------------------------------------------------
// App assembly
// ---------------------------------------------------------------------------

pub fn build_app(context: Arc<GatewayContext>) -> Router {
    let api_routes = Router::new()
        .route("/api/mcp/servers", get(list_servers).post(register_server))
        .route(
            "/api/mcp/servers/{name}",
            get(get_server).delete(remove_server),
        )
        .route("/api/tools/discover", post(discover_tools))
        .route("/api/tools/provision", post(provision_tools))
        .route("/api/proxy/execute", post(execute_tool));

    let mcp_routes = Router::new().route("/mcp", post(mcp::handle_post).get(mcp::handle_get));

    Router::new()
        .route("/health", get(health))
        .merge(api_routes)
        .merge(mcp_routes)
        .layer(axum::extract::DefaultBodyLimit::max(4 * 1024 * 1024))
        .layer(create_cors_layer())
        .fallback(sink_handler)
        .with_state(context)
}

fn create_cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::Any;

    tower_http::cors::CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Bind the configured port. When it is occupied and was not pinned by the
/// operator, probe the next ports in a bounded range.
fn bind_listener(
    host: &str,
    port: u16,
    port_explicit: bool,
) -> std::io::Result<std::net::TcpListener> {
    match std::net::TcpListener::bind((host, port)) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && !port_explicit => {
            for candidate in (port + 1)..=(port.saturating_add(PORT_PROBE_RANGE)) {
                if let Ok(listener) = std::net::TcpListener::bind((host, candidate)) {
                    warn!(
                        configured = port,
                        selected = candidate,
                        "Configured port in use, selected fallback port"
                    );
                    return Ok(listener);
                }
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

pub async fn startup(server_config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = server_config.config.clone();

    let _log_guard = logging::init_logging(LoggingConfig {
        level: parse_level(&config.gateway.log_level),
        log_dir: server_config.log_dir.clone(),
        ..Default::default()
    });

    info!(
        host = %config.gateway.host,
        port = config.gateway.port,
        backends = config.backends.len(),
        "Starting {}",
        version::get_version_string()
    );

    let context = GatewayContext::from_config(config.clone()).await?;

    let _config_watcher = match (&server_config.config_path, &server_config.config_raw) {
        (Some(path), Some(raw)) if config.gateway.config_watch_enabled => {
            match watcher::watch(path.clone(), raw, Arc::clone(&context.manager)) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Config watcher unavailable, continuing without reload");
                    None
                }
            }
        }
        _ => None,
    };

    let app = build_app(Arc::clone(&context));

    let listener = bind_listener(
        &config.gateway.host,
        config.gateway.port,
        server_config.port_explicit,
    )?;
    let local_addr: SocketAddr = listener.local_addr()?;
    info!("Gateway listening on {}", local_addr);

    let handle = axum_server::Handle::new();
    let handle_clone = handle.clone();
    spawn(async move {
        shutdown_signal().await;
        handle_clone.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    axum_server::from_tcp(listener)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("HTTP server stopped, draining backend sessions");
    context.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_fallback_when_port_taken() {
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();

        let listener = bind_listener("127.0.0.1", taken, false).expect("fallback bind");
        let selected = listener.local_addr().unwrap().port();
        assert_ne!(selected, taken);
        assert!(selected > taken && selected <= taken + PORT_PROBE_RANGE);
    }

    #[test]
    fn test_bind_explicit_port_does_not_fall_back() {
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();

        let err = bind_listener("127.0.0.1", taken, true).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_error_response_shape() {
        let err = GatewayError::NotConnected {
            backend: "puppeteer".to_string(),
        };
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
