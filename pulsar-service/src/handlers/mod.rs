pub mod health;
pub mod start;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::gateway::MessageGateway;
use crate::producer::MessagePublisher;

// Application state shared across handlers
pub struct AppState<P> {
    pub gateway: Arc<MessageGateway<P>>,
    pub service_name: Arc<str>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            service_name: self.service_name.clone(),
        }
    }
}

// Build application router
pub fn create_router<P: MessagePublisher>(state: AppState<P>) -> Router {
    Router::new()
        .route("/health", get(health::health_check::<P>))
        .route("/start", post(start::start::<P>))
        .route("/start/topic1", post(start::start_topic1::<P>))
        .route("/start/topic2", post(start::start_topic2::<P>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
