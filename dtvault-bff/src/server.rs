//! Server lifecycle: bind, serve, drain on SIGINT/SIGTERM.

use std::sync::Arc;

use tracing::{error, info};

use dtvault_api::{create_router, AppState};
use dtvault_core::{Config, ThumbnailSpec, Upstreams};

pub struct BffServer {
    config: Config,
    upstreams: Arc<Upstreams>,
    thumbnail: ThumbnailSpec,
}

impl BffServer {
    pub const fn new(config: Config, upstreams: Arc<Upstreams>, thumbnail: ThumbnailSpec) -> Self {
        Self {
            config,
            upstreams,
            thumbnail,
        }
    }

    /// Serve HTTP until a shutdown signal arrives, then let in-flight
    /// responses finish.
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let router = create_router(AppState::new(self.upstreams, self.thumbnail));

        info!("HTTP server listening on {}", http_addr);

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server error: {}", e);
            return Err(e.into());
        }

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C, starting graceful shutdown..."); }
        () = terminate => { info!("Received SIGTERM, starting graceful shutdown..."); }
    }
}
