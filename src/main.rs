// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod error;
mod infrastructure;
mod presentation;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::analysis_service::AnalysisService;
use crate::infrastructure::config::load_config;
use crate::infrastructure::http_backend::HttpBackend;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_config()?;

    // Create backend client (infrastructure layer)
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    tracing::info!("Using measurement backend at {}", config.backend.base_url);

    // Create services (application layer)
    let analysis_service = AnalysisService::new(
        backend.clone(),
        backend.clone(),
        backend,
        config.analysis.clone(),
        &config.export,
    );

    // Create application state
    let state = Arc::new(AppState { analysis_service });

    // Build router (presentation layer)
    // Note: compression is applied per response by the JSON helpers,
    // so there is no CompressionLayer here
    let router = Router::new()
        .route("/healthz", get(handlers::health_check))
        .route(
            "/sessions/:test_id",
            post(handlers::open_session).delete(handlers::close_session),
        )
        .route("/sessions/:test_id/frame", get(handlers::get_frame))
        .route("/sessions/:test_id/selection", post(handlers::toggle_sensor))
        .route("/sessions/:test_id/view", put(handlers::set_view))
        .route("/sessions/:test_id/refresh", post(handlers::refresh))
        .route(
            "/sessions/:test_id/segments",
            get(handlers::list_segments).post(handlers::create_segment),
        )
        .route(
            "/sessions/:test_id/segments/:segment_id",
            put(handlers::update_segment).delete(handlers::delete_segment),
        )
        .route(
            "/sessions/:test_id/segments/:segment_id/click",
            post(handlers::click_segment),
        )
        .route(
            "/sessions/:test_id/segments/:segment_id/edit",
            post(handlers::begin_segment_edit).delete(handlers::cancel_segment_edit),
        )
        .route("/sessions/:test_id/crop/begin", post(handlers::begin_crop))
        .route("/sessions/:test_id/crop/bounds", put(handlers::set_crop_bounds))
        .route("/sessions/:test_id/crop/confirm", post(handlers::confirm_crop))
        .route("/sessions/:test_id/crop/cancel", post(handlers::cancel_crop))
        .route("/sessions/:test_id/export", post(handlers::submit_export))
        .route(
            "/sessions/:test_id/export/progress",
            get(handlers::export_progress),
        )
        .route(
            "/sessions/:test_id/export/download",
            get(handlers::download_export),
        )
        .route("/sessions/:test_id/notices", get(handlers::list_notices))
        .route(
            "/sessions/:test_id/notices/:notice_id",
            axum::routing::delete(handlers::dismiss_notice),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server.bind.parse()?;
    tracing::info!("Starting rig-analysis service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
