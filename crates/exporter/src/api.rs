//! HTTP surface: scrape endpoint, health checks and the index page

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use exporter_lib::exposition;
use exporter_lib::{CollectionOrchestrator, ReadinessProbe};
use std::sync::Arc;
use tracing::info;

const METRICS_PATH: &str = "/metrics";

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<CollectionOrchestrator>,
    pub probe: Arc<ReadinessProbe>,
}

/// Scrape endpoint: runs a full collection cycle, then encodes a
/// snapshot of the store. Branch failures inside the cycle never fail
/// the scrape; only an encoding failure does.
async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let families = state.orchestrator.collect_and_gather().await;

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let format = exposition::negotiate_format(accept);
    let (body, content_type) = match exposition::encode(&families, format) {
        Ok(encoded) => encoded,
        Err(error) => return encoding_error(error.to_string()),
    };

    let accept_encoding = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok());
    let (body, content_encoding) = if exposition::gzip_accepted(accept_encoding) {
        match exposition::gzip(&body) {
            Ok(compressed) => (compressed, Some("gzip")),
            Err(error) => return encoding_error(error.to_string()),
        }
    } else {
        (body, None)
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(encoding) = content_encoding {
        builder = builder.header(header::CONTENT_ENCODING, encoding);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|error| encoding_error(error.to_string()))
}

fn encoding_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("metrics encoding failed: {message}\n"),
    )
        .into_response()
}

/// Liveness: the process is serving.
async fn live() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness: cached reachability probe of the controller endpoint.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.probe.status().await;
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn index() -> Html<String> {
    Html(format!(
        "<html>\n<head><title>Load Balancer Exporter</title></head>\n<body>\n\
         <h1>Load Balancer Exporter</h1>\n<p><a href='{METRICS_PATH}'>Metrics</a></p>\n\
         </body>\n</html>"
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(METRICS_PATH, get(metrics))
        .route("/healthz", get(healthz))
        .route("/live", get(live))
        .with_state(state)
}

/// Start the API server
pub async fn serve(addr: String, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    info!(addr = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
