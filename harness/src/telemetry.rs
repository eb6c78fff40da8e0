//! Utilities for collecting and reporting telemetry data.

use crate::Error;
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    serve, Extension, Router,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Initialize telemetry at `level`, exposing `registry` at `/metrics` on `metrics` (if provided).
///
/// Must be called from within a tokio runtime when `metrics` is set.
pub fn init(level: Level, metrics: Option<(SocketAddr, Arc<Registry>)>) -> Result<(), Error> {
    // Create fmt layer for logging
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_line_number(true)
        .with_thread_ids(true)
        .with_file(true);

    // Create a filter layer to set the maximum level
    let filter = EnvFilter::new(level.to_string());

    // Set the global subscriber
    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| Error::Telemetry(err.to_string()))?;

    // Expose metrics over HTTP
    if let Some((address, registry)) = metrics {
        tokio::spawn(async move {
            let listener = match TcpListener::bind(address).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(?err, %address, "could not bind to metrics address");
                    return;
                }
            };
            info!(%address, "serving metrics");
            if let Err(err) = serve(listener, router(registry)).await {
                error!(?err, "could not serve metrics");
            }
        });
    }
    Ok(())
}

/// A router serving `registry` in the prometheus text format at `/metrics`.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .layer(Extension(registry))
}

async fn metrics(Extension(registry): Extension<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    if let Err(err) = encode(&mut body, &registry) {
        error!(?err, "could not encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response()
}
