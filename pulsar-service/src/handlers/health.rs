use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::producer::MessagePublisher;

/// Service status enum
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub service: String,
    pub version: String,
}

/// GET /health
pub async fn health_check<P: MessagePublisher>(
    State(state): State<AppState<P>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: ServiceStatus::Healthy,
        service: state.service_name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
