//! Web server: axum REST API over the live track table.
//!
//! Read-only: every handler answers from an in-memory snapshot.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use sbs_core::TrackTable;

use crate::engine::Engine;
use crate::feed::{FeedState, FeedStats};
use crate::stop::StopSignal;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub table: Arc<TrackTable>,
    pub stats: Arc<FeedStats>,
    pub feed_state: watch::Receiver<FeedState>,
}

impl AppState {
    pub fn from_engine(engine: &Engine) -> Self {
        AppState {
            table: engine.table(),
            stats: engine.stats(),
            feed_state: engine.watch_state(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/aircraft", axum::routing::get(routes::api_aircraft))
        .route(
            "/api/aircraft/:hex",
            axum::routing::get(routes::api_aircraft_detail),
        )
        .route("/api/stats", axum::routing::get(routes::api_stats))
        .with_state(state)
        .layer(cors)
}

/// Serve the API until `stop` fires.
pub async fn serve(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    mut stop: StopSignal,
) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.stopped().await })
        .await
}
