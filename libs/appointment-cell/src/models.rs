// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::fmt;

use shared_config::AppConfig;

use crate::error::SchedulingError;
use crate::services::interval::Interval;

pub const MIN_DURATION_MINUTES: i32 = 15;
pub const MAX_DURATION_MINUTES: i32 = 480;
pub const DEFAULT_DURATION_MINUTES: i32 = 60;
pub const SLOT_STEP_MINUTES: i32 = 15;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One row of the `appointments` table. The practitioner column is
/// `user_id` in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub contact_id: Uuid,
    #[serde(rename = "user_id")]
    pub practitioner_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub cancelled_by: Option<CancelledBy>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub session_notes: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_amount: Option<i64>,
    #[serde(default)]
    pub tag_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Stored duration, or the 60 minute default when the row has none.
    pub fn effective_duration(&self) -> i32 {
        self.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES)
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.scheduled_start, self.effective_duration())
    }

    /// Whether the appointment still holds its time slot.
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Agendada,
    Confirmada,
    Realizada,
    Faltou,
    Cancelada,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Agendada => "agendada",
            AppointmentStatus::Confirmada => "confirmada",
            AppointmentStatus::Realizada => "realizada",
            AppointmentStatus::Faltou => "faltou",
            AppointmentStatus::Cancelada => "cancelada",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Realizada | AppointmentStatus::Faltou | AppointmentStatus::Cancelada
        )
    }

    /// Cancelled appointments never take part in conflict detection.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelada)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    #[serde(alias = "paciente")]
    Patient,
    #[serde(alias = "profissional", alias = "dentista", alias = "doctor")]
    Practitioner,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::Patient => write!(f, "patient"),
            CancelledBy::Practitioner => write!(f, "practitioner"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pendente,
    Pago,
    Cancelado,
}

// ==============================================================================
// SLOTS AND WORKING HOURS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, SchedulingError> {
        if start >= end {
            return Err(SchedulingError::validation(
                "workingHours",
                format!("start {} must be before end {}", start.format("%H:%M"), end.format("%H:%M")),
            ));
        }
        Ok(Self { start, end })
    }
}

/// A free start time, as presented to callers. `start` is the absolute
/// instant and is not part of the wire shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub time: String,
    pub duration_minutes: i32,
    pub available: bool,
    #[serde(skip)]
    pub start: DateTime<Utc>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateAppointmentRequest {
    pub contact_id: Uuid,
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub date: String,
    pub time: String,
    pub duration_minutes: Option<i32>,
    pub status: Option<AppointmentStatus>,
    pub tag_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub specialty: Option<String>,
    pub appointment_type: Option<String>,
    pub session_notes: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_amount: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UpdateStatusRequest {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RescheduleAppointmentRequest {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub date: String,
    pub time: String,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CancelAppointmentRequest {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityRequest {
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub date: String,
    pub duration_minutes: Option<i32>,
    pub working_hours_start: Option<String>,
    pub working_hours_end: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictCheckRequest {
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub date: String,
    pub time: String,
    pub duration_minutes: Option<i32>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ListAppointmentsRequest {
    pub clinic_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Resolved listing filters; `date_from`/`date_to` bound `scheduled_start`
/// as a half-open `[from, to)` range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentFilter {
    pub practitioner_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.practitioner_id.map_or(true, |id| appointment.practitioner_id == id)
            && self.contact_id.map_or(true, |id| appointment.contact_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self.date_from.map_or(true, |from| appointment.scheduled_start >= from)
            && self.date_to.map_or(true, |to| appointment.scheduled_start < to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_LIMIT, offset: 0 }
    }
}

// ==============================================================================
// RESULT ENVELOPE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Conflict,
    InvalidTransition,
    StorageError,
}

/// What every public agent operation returns. `conflicts` and
/// `suggested_slots` are only populated on a conflict failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub appointment_id: Option<Uuid>,
    pub conflicts: Option<Vec<Appointment>>,
    pub suggested_slots: Option<Vec<Slot>>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            appointment_id: None,
            conflicts: None,
            suggested_slots: None,
        }
    }

    pub fn failure(error: SchedulingError) -> Self {
        let kind = error.kind();
        let message = error.public_message();
        let (conflicts, suggested_slots) = match error {
            SchedulingError::Conflict { conflicts, suggested_slots } => {
                (Some(conflicts), Some(suggested_slots))
            }
            _ => (None, None),
        };

        Self {
            success: false,
            data: None,
            error: Some(message),
            error_kind: Some(kind),
            appointment_id: None,
            conflicts,
            suggested_slots,
        }
    }

    pub fn from_result(result: Result<T, SchedulingError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::failure(error),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.error_kind == Some(ErrorKind::Conflict)
    }
}

impl OperationResult<Appointment> {
    pub fn from_appointment(result: Result<Appointment, SchedulingError>) -> Self {
        match result {
            Ok(appointment) => {
                let id = appointment.id;
                Self {
                    appointment_id: Some(id),
                    ..Self::ok(appointment)
                }
            }
            Err(error) => Self::failure(error),
        }
    }
}

// ==============================================================================
// SCHEDULING RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub timezone: Tz,
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
    pub default_duration_minutes: i32,
    pub slot_step_minutes: i32,
    pub suggested_slots_limit: usize,
    pub default_working_hours: WorkingHours,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timezone: config.clinic_timezone,
            min_duration_minutes: MIN_DURATION_MINUTES,
            max_duration_minutes: MAX_DURATION_MINUTES,
            default_duration_minutes: DEFAULT_DURATION_MINUTES,
            slot_step_minutes: SLOT_STEP_MINUTES,
            suggested_slots_limit: config.suggested_slots_limit,
            default_working_hours: WorkingHours {
                start: config.working_hours_start,
                end: config.working_hours_end,
            },
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}
