pub mod api;
pub mod websocket;

use crate::agent::AIAgent;
use crate::config::settings::ServerConfig;
use std::error::Error;
use std::sync::Arc;

/// rustls is built with more than one crypto backend, so the process-level
/// provider must be chosen before any TLS config is built. Safe to call
/// repeatedly.
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

pub struct Server {
    config: ServerConfig,
    agent: Arc<AIAgent>,
}

impl Server {
    pub fn new(config: ServerConfig, agent: Arc<AIAgent>) -> Self {
        Self { config, agent }
    }

    /// Starts the page server in the background, then runs the WebSocket
    /// accept loop until it fails.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(
            &self.config.http_addr,
            &self.config.public_ws_url,
            self.config.tls.as_ref()
        ).await?;

        websocket::start_ws_server(
            &self.config.ws_addr,
            self.agent.clone(),
            self.config.tls.as_ref()
        ).await
    }
}
