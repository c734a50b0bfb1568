//! Relay endpoint
//!
//! `POST /v1/relay` takes a conversation snapshot and streams back the
//! relay's events as SSE, one JSON `StreamEvent` per `data:` frame,
//! followed by `data: [DONE]`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult, GENERAL_ERROR_MESSAGE},
    event::StreamEvent,
    upstream::{Message, Role},
    AppState,
};

/// Relay request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub messages: Vec<Message>,
}

impl RelayRequest {
    fn validate(&self) -> AppResult<()> {
        if self.messages.is_empty() {
            return Err(AppError::BadRequest(
                "messages must contain at least one message".to_string(),
            ));
        }
        if self.messages.iter().any(|m| m.role == Role::System) {
            return Err(AppError::BadRequest(
                "system messages are supplied by the relay".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_sse(event: &StreamEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize stream event");
        Event::default().data(format!("{{\"error\":\"{}\"}}", GENERAL_ERROR_MESSAGE))
    })
}

/// Handle relay requests
pub async fn relay_chat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let request: RelayRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    request.validate()?;

    info!(
        messages = request.messages.len(),
        in_flight = state.gate.in_flight(),
        "Processing relay request"
    );

    let events = state
        .relay
        .relay(&request.messages)
        .map(|event| Ok::<_, Infallible>(to_sse(&event)))
        .chain(stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

    Ok((
        [("X-Accel-Buffering", "no")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}
