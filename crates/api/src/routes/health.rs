//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use storage::BookshopStore;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub users_in_flight: usize,
}

/// GET /health: liveness plus the number of users being served right now.
pub async fn check<S: BookshopStore>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        users_in_flight: state.flow.users_in_flight(),
    })
}
