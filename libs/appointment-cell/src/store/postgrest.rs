use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::{DatabaseError, PostgrestClient};

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, Pagination};
use crate::store::{AppointmentStore, NewAppointment, StatusChange, StoreError};

const APPOINTMENTS: &str = "/rest/v1/appointments";
const CONTACTS: &str = "/rest/v1/contacts";
const PRACTITIONERS: &str = "/rest/v1/users";
const TAGS: &str = "/rest/v1/tags";

/// Gateway over PostgREST. Overlaps are rejected by the
/// `appointments_no_overlap` exclusion constraint at commit time.
pub struct PostgrestStore {
    client: Arc<PostgrestClient>,
}

impl PostgrestStore {
    pub fn new(client: Arc<PostgrestClient>) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<Value> = self.client
            .request(Method::GET, path, None)
            .await
            .map_err(map_database_error)?;
        decode_rows(rows)
    }

    async fn write(&self, method: Method, path: &str, body: Value) -> Result<Vec<Appointment>, StoreError> {
        let rows: Vec<Value> = self.client
            .request_returning(method, path, Some(body))
            .await
            .map_err(map_database_error)?;
        decode_rows(rows)
    }

    async fn exists(&self, table: &str, clinic_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?select=id&id=eq.{}&clinic_id=eq.{}&limit=1", table, id, clinic_id);
        let rows: Vec<Value> = self.fetch(&path).await?;
        Ok(!rows.is_empty())
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

fn scheduled_end(start: DateTime<Utc>, duration_minutes: i32) -> String {
    (start + Duration::minutes(duration_minutes as i64)).to_rfc3339()
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| StoreError::Backend(format!("Failed to parse appointments: {}", e)))
}

fn map_database_error(e: DatabaseError) -> StoreError {
    if e.is_exclusion_violation() {
        debug!("Exclusion constraint rejected overlapping appointment");
        return StoreError::Overlap;
    }
    error!("Appointment storage failure: {}", e);
    StoreError::Backend(e.to_string())
}

/// Query string for listing: filters, ordering and pagination.
pub fn list_query(clinic_id: Uuid, filter: &AppointmentFilter, page: Pagination) -> String {
    let mut query_parts = vec![format!("clinic_id=eq.{}", clinic_id)];

    if let Some(practitioner_id) = filter.practitioner_id {
        query_parts.push(format!("user_id=eq.{}", practitioner_id));
    }
    if let Some(contact_id) = filter.contact_id {
        query_parts.push(format!("contact_id=eq.{}", contact_id));
    }
    if let Some(status) = filter.status {
        query_parts.push(format!("status=eq.{}", status));
    }
    if let Some(from) = filter.date_from {
        query_parts.push(format!("scheduled_start=gte.{}", timestamp(from)));
    }
    if let Some(to) = filter.date_to {
        query_parts.push(format!("scheduled_start=lt.{}", timestamp(to)));
    }

    query_parts.push("order=scheduled_start.asc,id.asc".to_string());
    query_parts.push(format!("limit={}", page.limit));
    query_parts.push(format!("offset={}", page.offset));

    query_parts.join("&")
}

#[async_trait]
impl AppointmentStore for PostgrestStore {
    async fn contact_exists(&self, clinic_id: Uuid, contact_id: Uuid) -> Result<bool, StoreError> {
        self.exists(CONTACTS, clinic_id, contact_id).await
    }

    async fn practitioner_exists(&self, clinic_id: Uuid, practitioner_id: Uuid) -> Result<bool, StoreError> {
        self.exists(PRACTITIONERS, clinic_id, practitioner_id).await
    }

    async fn tag_exists(&self, clinic_id: Uuid, tag_id: Uuid) -> Result<bool, StoreError> {
        self.exists(TAGS, clinic_id, tag_id).await
    }

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}&clinic_id=eq.{}&limit=1", APPOINTMENTS, appointment_id, clinic_id);
        Ok(self.fetch::<Appointment>(&path).await?.into_iter().next())
    }

    async fn active_appointments_between(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let query_parts = [
            format!("clinic_id=eq.{}", clinic_id),
            format!("user_id=eq.{}", practitioner_id),
            format!("status=neq.{}", AppointmentStatus::Cancelada),
            format!("scheduled_start=gte.{}", timestamp(from)),
            format!("scheduled_start=lt.{}", timestamp(to)),
            "order=scheduled_start.asc".to_string(),
        ];
        let path = format!("{}?{}", APPOINTMENTS, query_parts.join("&"));
        self.fetch(&path).await
    }

    async fn insert_appointment(&self, new: NewAppointment) -> Result<Appointment, StoreError> {
        let now = Utc::now().to_rfc3339();
        let body = json!({
            "clinic_id": new.clinic_id,
            "contact_id": new.contact_id,
            "user_id": new.practitioner_id,
            "scheduled_start": new.scheduled_start.to_rfc3339(),
            "scheduled_end": scheduled_end(new.scheduled_start, new.duration_minutes),
            "duration_minutes": new.duration_minutes,
            "status": new.status,
            "doctor_name": new.doctor_name,
            "specialty": new.specialty,
            "appointment_type": new.appointment_type,
            "session_notes": new.session_notes,
            "payment_status": new.payment_status,
            "payment_amount": new.payment_amount,
            "tag_id": new.tag_id,
            "created_at": now,
            "updated_at": now,
        });

        self.write(Method::POST, APPOINTMENTS, body)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no rows".to_string()))
    }

    async fn update_interval(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        scheduled_start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, StoreError> {
        let path = format!(
            "{}?id=eq.{}&clinic_id=eq.{}&status=eq.{}",
            APPOINTMENTS, appointment_id, clinic_id, expected
        );
        let body = json!({
            "scheduled_start": scheduled_start.to_rfc3339(),
            "scheduled_end": scheduled_end(scheduled_start, duration_minutes),
            "duration_minutes": duration_minutes,
            "updated_at": Utc::now().to_rfc3339(),
        });

        self.write(Method::PATCH, &path, body)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::StaleStatus)
    }

    async fn update_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Appointment, StoreError> {
        let path = format!(
            "{}?id=eq.{}&clinic_id=eq.{}&status=eq.{}",
            APPOINTMENTS, appointment_id, clinic_id, expected
        );

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(change.status));
        if let Some(cancelled_by) = change.cancelled_by {
            update_data.insert("cancelled_by".to_string(), json!(cancelled_by));
        }
        if let Some(reason) = change.cancellation_reason {
            update_data.insert("cancellation_reason".to_string(), json!(reason));
        }
        if let Some(notes) = change.session_notes {
            update_data.insert("session_notes".to_string(), json!(notes));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.write(Method::PATCH, &path, Value::Object(update_data))
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::StaleStatus)
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!("{}?{}", APPOINTMENTS, list_query(clinic_id, filter, page));
        self.fetch(&path).await
    }
}
