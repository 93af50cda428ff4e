//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ObjectLookup;
use crate::{Error, Result};

use super::handlers;

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    pub apiservices: Arc<dyn ObjectLookup<APIService>>,
}

impl ApiState {
    pub fn new(apiservices: Arc<dyn ObjectLookup<APIService>>) -> Self {
        Self { apiservices }
    }
}

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Build the router without binding a listener
pub fn router(state: ApiState) -> Router {
    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/api/v1/apiservices", get(handlers::list_apiservices))
        .route("/api/v1/apiservices/{name}", get(handlers::get_apiservice));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the REST API server
pub async fn run_server(state: ApiState, addr: SocketAddr) -> Result<()> {
    let app = router(state);

    info!("REST API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
