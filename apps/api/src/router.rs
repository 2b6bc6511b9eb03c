use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use appointment_cell::SchedulingAgent;

pub fn create_router(agent: Arc<SchedulingAgent>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .route("/health", get(|| async { "ok" }))
        .merge(appointment_routes(agent))
}
