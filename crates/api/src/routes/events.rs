//! Inbound transport events.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::{MessageRef, RequestId, UserId};
use domain::{CallbackAction, Command, InboundEvent};
use order_flow::Disposition;
use serde::{Deserialize, Serialize};
use storage::BookshopStore;
use tracing::Instrument;

use super::AppState;
use crate::error::ApiError;

// -- Request types --

/// An event as the chat transport reports it: raw command text and raw
/// callback data.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRequest {
    Command {
        user_id: i64,
        chat_ref: i64,
        text: String,
    },
    Text {
        user_id: i64,
        content: String,
    },
    Callback {
        user_id: i64,
        message_id: Option<i64>,
        data: String,
    },
}

impl TryFrom<EventRequest> for InboundEvent {
    type Error = ApiError;

    fn try_from(request: EventRequest) -> Result<Self, Self::Error> {
        Ok(match request {
            EventRequest::Command {
                user_id,
                chat_ref,
                text,
            } => InboundEvent::Command {
                user_id: UserId::new(user_id),
                chat_ref,
                command: Command::parse(&text)?,
            },
            EventRequest::Text { user_id, content } => InboundEvent::Text {
                user_id: UserId::new(user_id),
                content,
            },
            EventRequest::Callback {
                user_id,
                message_id,
                data,
            } => InboundEvent::Callback {
                user_id: UserId::new(user_id),
                message: message_id.map(MessageRef::new),
                action: data.parse::<CallbackAction>()?,
            },
        })
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub request_id: RequestId,
    pub applied: bool,
    pub refusal: Option<String>,
}

// -- Handlers --

/// POST /events: decode one transport event and run it through the order flow.
///
/// The response is sent after the event has been handled; replies are
/// queued in the user's outbox.
pub async fn receive<S: BookshopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<EventRequest>,
) -> Result<Json<EventResponse>, ApiError> {
    let request_id = RequestId::new();
    let event = InboundEvent::try_from(request)?;
    let span = tracing::info_span!(
        "inbound_event",
        %request_id,
        user_id = %event.user_id(),
        kind = event.kind()
    );

    let disposition = state.flow.handle(event).instrument(span).await?;

    Ok(Json(EventResponse {
        request_id,
        applied: disposition.is_applied(),
        refusal: match disposition {
            Disposition::Applied => None,
            Disposition::Refused(error) => Some(error.to_string()),
        },
    }))
}
