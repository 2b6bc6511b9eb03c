// libs/appointment-cell/src/handlers.rs
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AvailabilityRequest, CancelAppointmentRequest, ConflictCheckRequest, CreateAppointmentRequest,
    ErrorKind, ListAppointmentsRequest, OperationResult, RescheduleAppointmentRequest, Slot,
    UpdateStatusRequest,
};
use crate::services::SchedulingAgent;

pub type Envelope<T> = (StatusCode, Json<OperationResult<T>>);

// ==============================================================================
// REQUEST PLUMBING
// ==============================================================================

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None => StatusCode::OK,
        Some(ErrorKind::ValidationError) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::Conflict) => StatusCode::CONFLICT,
        Some(ErrorKind::InvalidTransition) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::StorageError) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: OperationResult<T>) -> Envelope<T> {
    (status_for(result.error_kind), Json(result))
}

fn reject<T: Serialize>(error: SchedulingError) -> Envelope<T> {
    debug!("Rejecting request before scheduling: {}", error);
    respond(OperationResult::failure(error))
}

/// Empty bodies read as `{}` so that missing fields are reported by name.
fn parse_body(body: &Bytes) -> Result<Map<String, Value>, SchedulingError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(SchedulingError::validation("body", "expected a JSON object")),
        Err(e) => Err(SchedulingError::validation("body", format!("malformed JSON: {}", e))),
    }
}

/// Query strings carry only text; integers are turned back into numbers
/// so that they deserialize like their JSON counterparts.
fn query_fields(params: HashMap<String, String>) -> Map<String, Value> {
    params
        .into_iter()
        .map(|(key, value)| {
            let value = match value.parse::<i64>() {
                Ok(number) => Value::from(number),
                Err(_) => Value::String(value),
            };
            (key, value)
        })
        .collect()
}

/// Path segments win, but a payload naming a different id is refused.
fn inject_path_id(fields: &mut Map<String, Value>, name: &str, value: String) -> Result<(), SchedulingError> {
    match fields.get(name) {
        Some(Value::String(existing)) if existing.eq_ignore_ascii_case(&value) => {}
        Some(_) => {
            return Err(SchedulingError::validation(name, "does not match the request path"));
        }
        None => {}
    }
    fields.insert(name.to_string(), Value::String(value));
    Ok(())
}

fn scoped_payload(
    mut fields: Map<String, Value>,
    clinic_id: String,
    appointment_id: Option<String>,
) -> Result<Value, SchedulingError> {
    inject_path_id(&mut fields, "clinicId", clinic_id)?;
    if let Some(appointment_id) = appointment_id {
        inject_path_id(&mut fields, "appointmentId", appointment_id)?;
    }
    Ok(Value::Object(fields))
}

fn parse_path_uuid(field: &str, value: &str) -> Result<Uuid, SchedulingError> {
    Uuid::parse_str(value).map_err(|_| SchedulingError::validation(field, "must be a UUID"))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

pub async fn create_appointment(
    State(agent): State<Arc<SchedulingAgent>>,
    Path(clinic_id): Path<String>,
    body: Bytes,
) -> Envelope<Appointment> {
    let request = match parse_body(&body)
        .and_then(|fields| scoped_payload(fields, clinic_id, None))
        .and_then(CreateAppointmentRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    let result = agent.create_appointment(request).await;
    if result.success {
        (StatusCode::CREATED, Json(result))
    } else {
        respond(result)
    }
}

pub async fn list_appointments(
    State(agent): State<Arc<SchedulingAgent>>,
    Path(clinic_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Envelope<Vec<Appointment>> {
    let request = match scoped_payload(query_fields(params), clinic_id, None)
        .and_then(ListAppointmentsRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.list_appointments(request).await)
}

pub async fn get_appointment(
    State(agent): State<Arc<SchedulingAgent>>,
    Path((clinic_id, appointment_id)): Path<(String, String)>,
) -> Envelope<Appointment> {
    let clinic_id = match parse_path_uuid("clinicId", &clinic_id) {
        Ok(id) => id,
        Err(e) => return reject(e),
    };
    let appointment_id = match parse_path_uuid("appointmentId", &appointment_id) {
        Ok(id) => id,
        Err(e) => return reject(e),
    };

    respond(agent.get_appointment(clinic_id, appointment_id).await)
}

pub async fn update_status(
    State(agent): State<Arc<SchedulingAgent>>,
    Path((clinic_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> Envelope<Appointment> {
    let request = match parse_body(&body)
        .and_then(|fields| scoped_payload(fields, clinic_id, Some(appointment_id)))
        .and_then(UpdateStatusRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.update_status(request).await)
}

pub async fn reschedule_appointment(
    State(agent): State<Arc<SchedulingAgent>>,
    Path((clinic_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> Envelope<Appointment> {
    let request = match parse_body(&body)
        .and_then(|fields| scoped_payload(fields, clinic_id, Some(appointment_id)))
        .and_then(RescheduleAppointmentRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.reschedule_appointment(request).await)
}

pub async fn cancel_appointment(
    State(agent): State<Arc<SchedulingAgent>>,
    Path((clinic_id, appointment_id)): Path<(String, String)>,
    body: Bytes,
) -> Envelope<Appointment> {
    let request = match parse_body(&body)
        .and_then(|fields| scoped_payload(fields, clinic_id, Some(appointment_id)))
        .and_then(CancelAppointmentRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.cancel_appointment(request).await)
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

pub async fn get_available_slots(
    State(agent): State<Arc<SchedulingAgent>>,
    Path(clinic_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Envelope<Vec<Slot>> {
    let request = match scoped_payload(query_fields(params), clinic_id, None)
        .and_then(AvailabilityRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.get_available_slots(request).await)
}

pub async fn check_conflicts(
    State(agent): State<Arc<SchedulingAgent>>,
    Path(clinic_id): Path<String>,
    body: Bytes,
) -> Envelope<Vec<Appointment>> {
    let request = match parse_body(&body)
        .and_then(|fields| scoped_payload(fields, clinic_id, None))
        .and_then(ConflictCheckRequest::from_json)
    {
        Ok(request) => request,
        Err(e) => return reject(e),
    };

    respond(agent.check_conflicts(request).await)
}
