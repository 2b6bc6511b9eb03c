// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::handlers;
use crate::services::SchedulingAgent;

/// Routes scoped to one clinic. Nest under `/clinics/{clinic_id}`; every
/// handler reads the clinic id from that segment.
pub fn appointment_routes(agent: Arc<SchedulingAgent>) -> Router {
    let clinic_routes = Router::new()
        .route("/appointments", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/status", patch(handlers::update_status))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/availability", get(handlers::get_available_slots))
        .route("/conflicts/check", post(handlers::check_conflicts));

    Router::new()
        .nest("/clinics/{clinic_id}", clinic_routes)
        .with_state(agent)
}
