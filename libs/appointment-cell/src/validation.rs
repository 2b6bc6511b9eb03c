//! Strict input boundary: JSON payloads are read field by field so that any
//! failure names the field responsible, and unknown fields are rejected.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono::offset::LocalResult;
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::SchedulingError;
use crate::models::{
    AvailabilityRequest, CancelAppointmentRequest, ConflictCheckRequest, CreateAppointmentRequest,
    ListAppointmentsRequest, RescheduleAppointmentRequest, SchedulingRules, UpdateStatusRequest,
    WorkingHours,
};

pub struct FieldReader {
    fields: Map<String, Value>,
}

impl FieldReader {
    pub fn new(payload: Value) -> Result<Self, SchedulingError> {
        match payload {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(SchedulingError::validation(
                "body",
                format!("expected a JSON object, got {}", json_type(&other)),
            )),
        }
    }

    /// Accept `alias` as an alternative spelling of `name`.
    pub fn with_alias(mut self, alias: &str, name: &str) -> Result<Self, SchedulingError> {
        if let Some(value) = self.fields.remove(alias) {
            if self.fields.contains_key(name) {
                return Err(SchedulingError::validation(alias, format!("duplicates `{}`", name)));
            }
            self.fields.insert(name.to_string(), value);
        }
        Ok(self)
    }

    pub fn required<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, SchedulingError> {
        self.optional(name)?
            .ok_or_else(|| SchedulingError::validation(name, "is required"))
    }

    /// Missing and `null` both read as `None`.
    pub fn optional<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>, SchedulingError> {
        match self.fields.remove(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SchedulingError::validation(name, e.to_string())),
        }
    }

    /// Fails on the first field that was never read.
    pub fn finish(self) -> Result<(), SchedulingError> {
        match self.fields.keys().min() {
            Some(unknown) => Err(SchedulingError::validation(unknown.as_str(), "unknown field")),
            None => Ok(()),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ==============================================================================
// FIELD VALIDATION
// ==============================================================================

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, SchedulingError> {
    if value.len() != 10 {
        return Err(SchedulingError::validation(field, format!("'{}' is not a YYYY-MM-DD date", value)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SchedulingError::validation(field, format!("'{}' is not a YYYY-MM-DD date", value)))
}

pub fn parse_time(field: &str, value: &str) -> Result<NaiveTime, SchedulingError> {
    if value.len() != 5 {
        return Err(SchedulingError::validation(field, format!("'{}' is not an HH:MM time", value)));
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| SchedulingError::validation(field, format!("'{}' is not an HH:MM time", value)))
}

/// Combine a clinic-local date and wall-clock time into an instant.
pub fn resolve_local(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, SchedulingError> {
    match timezone.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => Err(SchedulingError::validation(
            "time",
            format!("{} {} is ambiguous in {}", date, time.format("%H:%M"), timezone),
        )),
        LocalResult::None => Err(SchedulingError::validation(
            "time",
            format!("{} {} does not exist in {}", date, time.format("%H:%M"), timezone),
        )),
    }
}

pub fn validate_duration(rules: &SchedulingRules, minutes: Option<i32>) -> Result<i32, SchedulingError> {
    let minutes = minutes.unwrap_or(rules.default_duration_minutes);
    if minutes < rules.min_duration_minutes || minutes > rules.max_duration_minutes {
        return Err(SchedulingError::validation(
            "durationMinutes",
            format!(
                "must be between {} and {} minutes, got {}",
                rules.min_duration_minutes, rules.max_duration_minutes, minutes
            ),
        ));
    }
    Ok(minutes)
}

pub fn validate_working_hours(
    rules: &SchedulingRules,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<WorkingHours, SchedulingError> {
    let start = match start {
        Some(value) => parse_time("workingHoursStart", value)?,
        None => rules.default_working_hours.start,
    };
    let end = match end {
        Some(value) => parse_time("workingHoursEnd", value)?,
        None => rules.default_working_hours.end,
    };
    WorkingHours::new(start, end)
}

// ==============================================================================
// JSON PAYLOADS
// ==============================================================================

impl CreateAppointmentRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?.with_alias("userId", "practitionerId")?;
        let request = Self {
            contact_id: reader.required("contactId")?,
            clinic_id: reader.required("clinicId")?,
            practitioner_id: reader.required("practitionerId")?,
            date: reader.required("date")?,
            time: reader.required("time")?,
            duration_minutes: reader.optional("durationMinutes")?,
            status: reader.optional("status")?,
            tag_id: reader.optional("tagId")?,
            doctor_name: reader.optional("doctorName")?,
            specialty: reader.optional("specialty")?,
            appointment_type: reader.optional("appointmentType")?,
            session_notes: reader.optional("sessionNotes")?,
            payment_status: reader.optional("paymentStatus")?,
            payment_amount: reader.optional("paymentAmount")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl UpdateStatusRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?;
        let request = Self {
            appointment_id: reader.required("appointmentId")?,
            clinic_id: reader.required("clinicId")?,
            status: reader.required("status")?,
            notes: reader.optional("notes")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl RescheduleAppointmentRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?;
        let request = Self {
            appointment_id: reader.required("appointmentId")?,
            clinic_id: reader.required("clinicId")?,
            date: reader.required("date")?,
            time: reader.required("time")?,
            duration_minutes: reader.optional("durationMinutes")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl CancelAppointmentRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?;
        let request = Self {
            appointment_id: reader.required("appointmentId")?,
            clinic_id: reader.required("clinicId")?,
            cancelled_by: reader.required("cancelledBy")?,
            reason: reader.optional("reason")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl AvailabilityRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?.with_alias("userId", "practitionerId")?;
        let request = Self {
            clinic_id: reader.required("clinicId")?,
            practitioner_id: reader.required("practitionerId")?,
            date: reader.required("date")?,
            duration_minutes: reader.optional("durationMinutes")?,
            working_hours_start: reader.optional("workingHoursStart")?,
            working_hours_end: reader.optional("workingHoursEnd")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl ConflictCheckRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?.with_alias("userId", "practitionerId")?;
        let request = Self {
            clinic_id: reader.required("clinicId")?,
            practitioner_id: reader.required("practitionerId")?,
            date: reader.required("date")?,
            time: reader.required("time")?,
            duration_minutes: reader.optional("durationMinutes")?,
            exclude_appointment_id: reader.optional("excludeAppointmentId")?,
        };
        reader.finish()?;
        Ok(request)
    }
}

impl ListAppointmentsRequest {
    pub fn from_json(payload: Value) -> Result<Self, SchedulingError> {
        let mut reader = FieldReader::new(payload)?.with_alias("userId", "practitionerId")?;
        let request = Self {
            clinic_id: reader.required("clinicId")?,
            practitioner_id: reader.optional("practitionerId")?,
            contact_id: reader.optional("contactId")?,
            status: reader.optional("status")?,
            date_from: reader.optional("dateFrom")?,
            date_to: reader.optional("dateTo")?,
            limit: reader.optional("limit")?,
            offset: reader.optional("offset")?,
        };
        reader.finish()?;
        Ok(request)
    }
}
