use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use tower_http::compression::CompressionLayer;

use crate::broker::{BrokerCore, BrokerError};

pub fn router(core: Arc<BrokerCore>) -> Router {
    Router::new()
        .route("/api/pubsub", get(get_pubsub))
        .layer(CompressionLayer::new())
        .with_state(core)
}

/// Serves the snapshot endpoint until the broker starts stopping.
pub async fn start_dashboard_server(core: Arc<BrokerCore>, host: &str, port: u16) -> Result<(), BrokerError> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| BrokerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!("Dashboard available at http://{}/api/pubsub", addr);

    let shutdown = core.shutdown_token();
    axum::serve(listener, router(core))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn get_pubsub(State(core): State<Arc<BrokerCore>>) -> impl IntoResponse {
    match core.snapshot().await {
        Ok(snapshot) => axum::Json(snapshot).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
