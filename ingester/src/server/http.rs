//! HTTP server for the ingester.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::signal;

use super::handlers::{
    handle_healthy, handle_label_names, handle_label_values, handle_metrics, handle_push,
    handle_query, handle_ready, AppState,
};
use super::middleware::MetricsLayer;
use crate::metrics::Metrics;
use crate::Ingester;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 9009 }
    }
}

/// HTTP server wrapping an [`Ingester`].
pub struct IngesterServer {
    ingester: Arc<Ingester>,
    metrics: Arc<Metrics>,
    config: ServerConfig,
}

impl IngesterServer {
    pub fn new(ingester: Arc<Ingester>, metrics: Arc<Metrics>, config: ServerConfig) -> Self {
        Self {
            ingester,
            metrics,
            config,
        }
    }

    /// Runs the server until SIGINT/SIGTERM, then drives the ingester's
    /// graceful shutdown: in-flight writes drain, shippers stop, tenant
    /// databases close.
    pub async fn run(self) {
        let state = AppState {
            ingester: self.ingester.clone(),
            metrics: self.metrics.clone(),
        };

        let app = Router::new()
            .route("/api/v1/push", post(handle_push))
            .route("/api/v1/query", post(handle_query))
            .route("/api/v1/labels", get(handle_label_names))
            .route("/api/v1/label/{name}/values", get(handle_label_values))
            .route("/metrics", get(handle_metrics))
            .route("/-/healthy", get(handle_healthy))
            .route("/-/ready", get(handle_ready))
            .layer(MetricsLayer::new(self.metrics.clone()))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        tracing::info!("Starting ingester HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .unwrap();

        self.ingester.shutdown().await;
        tracing::info!("Server shut down gracefully");
    }
}

/// Listen for SIGTERM (pod termination) and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
