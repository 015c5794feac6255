//! REST API route handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::web::AppState;

// ---------------------------------------------------------------------------
// Query param types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AircraftParams {
    with_position: Option<bool>,
}

// ---------------------------------------------------------------------------
// Aircraft endpoints
// ---------------------------------------------------------------------------

/// GET /api/aircraft: all tracked aircraft, most recently logged first.
pub async fn api_aircraft(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AircraftParams>,
) -> impl IntoResponse {
    let mut aircraft = state.table.snapshot();
    if params.with_position == Some(true) {
        aircraft.retain(|a| a.has_position());
    }
    Json(aircraft)
}

/// GET /api/aircraft/:hex: one aircraft.
pub async fn api_aircraft_detail(
    State(state): State<Arc<AppState>>,
    Path(hex): Path<String>,
) -> impl IntoResponse {
    let hex = hex.trim().to_ascii_uppercase();
    match state.table.get(&hex) {
        Some(track) => (StatusCode::OK, Json(json!(track))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("aircraft {hex} not tracked")})),
        ),
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// GET /api/stats
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tracked = state.table.len();
    let feed_state = *state.feed_state.borrow();
    Json(json!({
        "aircraft": tracked,
        "feed_state": feed_state,
        "feed": state.stats.counters(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
