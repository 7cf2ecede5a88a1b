//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::engine::Engine;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub engine: Arc<Engine>,
}

/// Web server for SmokeTrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            state: AppState { config, engine },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/targets", get(handlers::handle_get_targets))
            .route(
                "/api/ping/{id}",
                get(handlers::handle_get_pings).post(handlers::handle_trigger_ping),
            )
            .route(
                "/api/mtr/{id}",
                get(handlers::handle_get_routes).post(handlers::handle_trigger_route),
            )
            .route("/api/timeline/{id}", get(handlers::handle_timeline))
            .route("/api/statistics/{id}", get(handlers::handle_statistics))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }
}
