//! HTTP server for the SMART launch backend.
//!
//! ## Background Tasks
//!
//! Running the server starts two sweepers:
//! - abandoned pending authorizations past their TTL
//! - sessions expired for longer than the retention window

pub mod oauth;
pub mod responses;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use oauth::PendingAuthorizationStore;
use session::InMemorySessionStore;
use transport::HttpState;

/// SMART launch backend server.
pub struct BackendServer {
    config: Config,
}

impl BackendServer {
    /// Create a new server.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        tracing::info!("Starting SMART launch backend on port {}", port);

        let sessions = Arc::new(InMemorySessionStore::new(self.config.expired_session_retention));
        let pending = Arc::new(PendingAuthorizationStore::new(self.config.pending_ttl));

        // Start background cleanup tasks
        Arc::clone(&sessions).start_cleanup_task();
        Arc::clone(&pending).start_cleanup_task();

        let state = Arc::new(HttpState::with_stores(self.config, sessions, pending)?);
        tracing::info!(config = ?state.config, "Configuration loaded");

        let router = transport::create_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
