use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::Destination;
use crate::producer::MessagePublisher;

/// Reply body for an accepted message
pub const SENT: &str = "Sent!";

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub message: Option<String>,
}

/// POST /start
pub async fn start<P: MessagePublisher>(
    State(state): State<AppState<P>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ServiceResult<&'static str> {
    send(&state, Destination::Default, payload).await
}

/// POST /start/topic1
pub async fn start_topic1<P: MessagePublisher>(
    State(state): State<AppState<P>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ServiceResult<&'static str> {
    send(&state, Destination::Topic1, payload).await
}

/// POST /start/topic2
pub async fn start_topic2<P: MessagePublisher>(
    State(state): State<AppState<P>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ServiceResult<&'static str> {
    send(&state, Destination::Topic2, payload).await
}

async fn send<P: MessagePublisher>(
    state: &AppState<P>,
    destination: Destination,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> ServiceResult<&'static str> {
    let Json(request) = payload.map_err(|e| ServiceError::InvalidArgument(e.body_text()))?;
    let message = request.message.unwrap_or_default();

    state.gateway.submit(destination, &message).await?;
    Ok(SENT)
}
