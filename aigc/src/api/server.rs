use crate::config::{CorsConfig, ServerConfig};
use crate::gateway::Gateway;
use crate::{Error, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::routes;

/// Renders the Prometheus exposition text for `GET /metrics`
pub type MetricsRenderer = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: Option<MetricsRenderer>,
}

pub struct ApiServer {
    gateway: Arc<Gateway>,
    config: ServerConfig,
    metrics: Option<MetricsRenderer>,
}

impl ApiServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self::with_config(gateway, ServerConfig::default())
    }

    pub fn with_config(gateway: Arc<Gateway>, config: ServerConfig) -> Self {
        Self {
            gateway,
            config,
            metrics: None,
        }
    }

    /// Expose `GET /metrics` using the given renderer
    pub fn with_metrics(mut self, renderer: MetricsRenderer) -> Self {
        self.metrics = Some(renderer);
        self
    }

    /// Build CORS layer from configuration
    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        if !cors_config.enabled {
            return CorsLayer::new();
        }

        let has_wildcard = cors_config.origins.iter().any(|o| o == "*");
        let origins: Vec<HeaderValue> = cors_config
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();

        let cors = if has_wildcard {
            CorsLayer::new().allow_origin(tower_http::cors::Any)
        } else if origins.is_empty() {
            CorsLayer::new()
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(tower_http::cors::Any)
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: self.gateway.clone(),
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/generateQuestions", post(routes::generate_questions))
            .route("/getMetadata", post(routes::get_metadata))
            .route("/getAnswer", post(routes::get_answer))
            .route("/health", get(routes::health));

        if self.metrics.is_some() {
            router = router.route("/metrics", get(routes::metrics_text));
        }

        router
            .with_state(state)
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(Self::build_cors_layer(&self.config.cors))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        tracing::info!("Server listening on {}", local);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Server(e.to_string()))?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
