//! The gateway context: every service the request handlers need, constructed
//! once at startup and torn down in reverse order. There are no process-wide
//! singletons; handlers receive this context explicitly.

use std::{sync::Arc, time::Instant};

use crate::{
    client::ClientManager,
    config::GatewayConfig,
    core::error::GatewayResult,
    discovery::{DiscoveryService, Encoder, HashingEncoder},
    gating::GatingService,
    proxy::ProxyService,
    registry::ToolRegistry,
};

pub struct GatewayContext {
    pub config: GatewayConfig,
    pub registry: Arc<ToolRegistry>,
    pub manager: Arc<ClientManager>,
    pub discovery: Arc<DiscoveryService>,
    pub gating: Arc<GatingService>,
    pub proxy: Arc<ProxyService>,
    started_at: Instant,
}

impl GatewayContext {
    /// Build the service graph leaves-first and connect the configured
    /// backends. The registry starts empty and is rebuilt from backends.
    pub async fn from_config(config: GatewayConfig) -> GatewayResult<Arc<Self>> {
        Self::with_encoder(config, Arc::new(HashingEncoder::new())).await
    }

    /// Same as [`from_config`] with a caller-supplied embedding encoder.
    pub async fn with_encoder(
        config: GatewayConfig,
        encoder: Arc<dyn Encoder>,
    ) -> GatewayResult<Arc<Self>> {
        let registry = Arc::new(ToolRegistry::new());
        let manager = ClientManager::new(Arc::clone(&registry), config.gateway.clone());
        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&registry), encoder));
        let gating = Arc::new(GatingService::new(
            Arc::clone(&registry),
            config.gateway.max_tools_per_request,
            config.gateway.max_tokens_per_request,
            config.gateway.require_provisioning,
        ));
        let proxy = Arc::new(ProxyService::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            Arc::clone(&discovery),
            Arc::clone(&gating),
        ));

        manager.reconcile(config.backends.clone()).await;

        Ok(Arc::new(Self {
            config,
            registry,
            manager,
            discovery,
            gating,
            proxy,
            started_at: Instant::now(),
        }))
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Teardown: sessions drain first, then the rest drops with the context.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
