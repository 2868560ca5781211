//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use framegate_core::error::FramegateError;

use crate::handlers;
use crate::state::AppState;

/// Upper bound for a base64 frame upload.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Allow same-host dashboards on the configured port.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/frames", post(handlers::submit_frame))
        .route("/frames/{id}", get(handlers::get_frame))
        .route("/cameras/{camera_id}/batches", post(handlers::process_batch))
        .route("/batches/{batch_id}", get(handlers::get_batch))
        .route("/analyses/{id}", get(handlers::get_analysis))
        .route("/stats", get(handlers::stats))
        .route("/maintenance/cleanup", post(handlers::cleanup))
        .route("/maintenance/reap", post(handlers::reap))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on 127.0.0.1 at the configured port.
pub async fn start_server(state: AppState) -> Result<(), FramegateError> {
    let addr = format!("127.0.0.1:{}", state.config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
