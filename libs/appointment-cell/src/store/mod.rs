//! Persistence gateway for the `appointments` table and the clinic-scoped
//! lookups the scheduler needs. Every call is scoped by clinic.
//!
//! Implementations must make `insert_appointment` and `update_interval`
//! reject a write that would overlap another blocking appointment of the
//! same practitioner, atomically with the write itself, and report it as
//! [`StoreError::Overlap`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, CancelledBy, Pagination, PaymentStatus,
};

pub mod memory;
pub mod postgrest;

pub use memory::InMemoryStore;
pub use postgrest::PostgrestStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Appointment overlaps an existing booking")]
    Overlap,

    #[error("Appointment status changed concurrently")]
    StaleStatus,

    #[error("Record not found")]
    NotFound,

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub clinic_id: Uuid,
    pub contact_id: Uuid,
    pub practitioner_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub doctor_name: Option<String>,
    pub specialty: Option<String>,
    pub appointment_type: Option<String>,
    pub session_notes: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_amount: Option<i64>,
    pub tag_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: AppointmentStatus,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub session_notes: Option<String>,
}

impl StatusChange {
    pub fn to(status: AppointmentStatus) -> Self {
        Self {
            status,
            cancelled_by: None,
            cancellation_reason: None,
            session_notes: None,
        }
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn contact_exists(&self, clinic_id: Uuid, contact_id: Uuid) -> Result<bool, StoreError>;

    async fn practitioner_exists(&self, clinic_id: Uuid, practitioner_id: Uuid) -> Result<bool, StoreError>;

    async fn tag_exists(&self, clinic_id: Uuid, tag_id: Uuid) -> Result<bool, StoreError>;

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Non-cancelled appointments of the practitioner whose
    /// `scheduled_start` lies in `[from, to)`, ordered by start.
    async fn active_appointments_between(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, StoreError>;

    /// Moves the appointment only if its stored status still equals
    /// `expected`; otherwise fails with [`StoreError::StaleStatus`], so a
    /// concurrent cancellation or completion is never overwritten.
    async fn update_interval(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        scheduled_start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, StoreError>;

    /// Applies `change` only if the stored status still equals `expected`;
    /// otherwise fails with [`StoreError::StaleStatus`].
    async fn update_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Appointment, StoreError>;

    /// Ordered by `scheduled_start` ascending, then id.
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Vec<Appointment>, StoreError>;
}
