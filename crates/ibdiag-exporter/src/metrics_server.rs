//! HTTP server for the Prometheus endpoint
//!
//! `GET /metrics` runs a scrape and returns the text exposition.
//! `POST /-/reload` re-reads the baseline snapshot without a restart.

use crate::error::{ExporterError, Result};
use crate::exporter::Exporter;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Content type of the text exposition format
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
}

impl MetricsServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }
}

pub struct MetricsServer {
    pub config: MetricsServerConfig,
    exporter: Arc<Exporter>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, exporter: Arc<Exporter>) -> Self {
        Self { config, exporter }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/-/reload", post(reload_handler))
            .with_state(Arc::clone(&self.exporter))
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                ExporterError::Other(format!(
                    "Failed to bind to {}: {}",
                    self.config.listen_addr, e
                ))
            })?;

        info!(listen_addr = %self.config.listen_addr, "Metrics server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ExporterError::Other(format!("Server error: {}", e)))?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
    let body = exporter.scrape().await;
    ([(axum::http::header::CONTENT_TYPE, TEXT_FORMAT)], body)
}

async fn reload_handler(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
    match exporter.reload_baseline().await {
        Ok(entries) => (StatusCode::OK, format!("baseline reloaded, {} entries\n", entries)),
        Err(e) => {
            warn!(error = %e, "Baseline reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e))
        }
    }
}
