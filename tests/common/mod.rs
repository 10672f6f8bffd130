// Shared test fixtures: mock MCP backends over each transport and a helper
// that serves a gateway app on an ephemeral port.

pub mod mock_backend;

use std::sync::Arc;

use mtg::{app_context::GatewayContext, server};

/// Serve the gateway app for `context` on an ephemeral local port and return
/// its base URL.
pub async fn serve_gateway(context: Arc<GatewayContext>) -> String {
    let app = server::build_app(context);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test app");
    });
    format!("http://127.0.0.1:{}", port)
}
