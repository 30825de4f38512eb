//! Outbound message queue per user.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::UserId;
use order_flow::Delivered;
use serde::Serialize;
use storage::BookshopStore;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub user_id: UserId,
    pub messages: Vec<Delivered>,
}

/// GET /users/{id}/outbox: drain everything queued for a user.
#[tracing::instrument(skip(state))]
pub async fn drain<S: BookshopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Json<OutboxResponse> {
    let user_id = UserId::new(id);
    let messages = state.flow.messenger().take_messages(user_id).await;
    tracing::debug!(count = messages.len(), "outbox drained");

    Json(OutboxResponse { user_id, messages })
}
