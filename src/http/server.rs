use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::metrics::MetricsRegistry;
use super::handlers::{database_metrics_handler, health_handler, metrics_handler, AppState};

pub struct HttpServer {
    addr: String,
    metrics: Arc<MetricsRegistry>,
}

impl HttpServer {
    pub fn new(addr: impl Into<String>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            addr: addr.into(),
            metrics,
        }
    }

    pub fn router(metrics: Arc<MetricsRegistry>) -> Router {
        let state = Arc::new(AppState { metrics });

        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/metrics/databases", get(metrics_handler))
            .route("/api/metrics/databases/:db", get(database_metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serves until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Self::router(self.metrics);
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;

        info!("HTTP server listening on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
