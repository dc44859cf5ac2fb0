//! Proxy server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

use super::handler::ProxyHandler;
use super::router::{AppState, create_router};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::{Error, Result};

/// Apps Script proxy server
pub struct ProxyServer {
    /// Configuration
    config: Config,
    /// Shared state handed to the router
    state: Arc<AppState>,
}

impl ProxyServer {
    /// Create a new server. The cache lives as long as the server.
    pub fn new(config: Config) -> Result<Self> {
        if !config.server.path.starts_with('/') || config.server.path == "/health" {
            return Err(Error::Config(format!(
                "Invalid server.path {:?}: must start with '/' and not be /health",
                config.server.path
            )));
        }

        let cache = Arc::new(ResponseCache::new());
        let handler = ProxyHandler::new(&config, cache)?;

        Ok(Self {
            config,
            state: Arc::new(AppState { handler }),
        })
    }

    /// Run the server until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let app = create_router(Arc::clone(&self.state), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("GAS PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            "  POST http://{}:{}{}  (proxy)",
            self.config.server.host, self.config.server.port, self.config.server.path
        );
        info!(
            "  GET  http://{}:{}/health",
            self.config.server.host, self.config.server.port
        );
        info!(
            timeout = ?self.config.upstream.timeout,
            forward_mode = ?self.config.upstream.forward_mode,
            "Upstream"
        );
        if self.config.cache.enabled {
            info!(
                action = %self.config.cache.cacheable_action,
                ttl = ?self.config.cache.ttl,
                mutating = ?self.config.cache.mutating_actions,
                "Read cache enabled"
            );
        } else {
            info!("Read cache disabled");
        }
        if let Some(missing) = self.state.handler.missing_configuration() {
            warn!(
                missing = missing,
                "Upstream not configured - every proxy request will fail with 500"
            );
        }
        info!("============================================================");

        // Sweep expired entries so an idle process doesn't hold stale bodies
        let cache = Arc::clone(self.state.handler.cache());
        let sweep_interval = self.config.cache.sweep_interval.max(Duration::from_secs(1));
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Swept expired cache entries");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_relative_path() {
        let mut config = Config::default();
        config.server.path = "api".to_string();
        assert!(matches!(ProxyServer::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_health_path() {
        let mut config = Config::default();
        config.server.path = "/health".to_string();
        assert!(matches!(ProxyServer::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_builds_without_secrets() {
        let server = ProxyServer::new(Config::default()).unwrap();
        assert!(!server.state.handler.is_configured());
    }
}
