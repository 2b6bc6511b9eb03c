use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, MAX_DURATION_MINUTES};
use crate::services::interval::Interval;
use crate::store::{AppointmentStore, StoreError};

/// Appointments from `existing` that block `candidate`. Cancelled rows and
/// the excluded id never count.
pub fn find_conflicts<'a>(
    candidate: &Interval,
    existing: &'a [Appointment],
    exclude_appointment_id: Option<Uuid>,
) -> Vec<&'a Appointment> {
    existing
        .iter()
        .filter(|appointment| appointment.is_blocking())
        .filter(|appointment| Some(appointment.id) != exclude_appointment_id)
        .filter(|appointment| candidate.overlaps(&appointment.interval()))
        .collect()
}

/// Range of `scheduled_start` values that can produce an overlap with
/// `candidate`: anything starting up to one maximum-length appointment
/// earlier, through the candidate's end.
pub fn lookup_window(candidate: &Interval) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        candidate.start() - Duration::minutes(MAX_DURATION_MINUTES as i64),
        candidate.end(),
    )
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Existing appointments of the practitioner that overlap `candidate`.
    /// An empty list means the interval is free.
    pub async fn check_conflicts(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        candidate: Interval,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        debug!(
            "Checking conflicts for practitioner {} from {} to {}",
            practitioner_id, candidate.start(), candidate.end()
        );

        let (from, to) = lookup_window(&candidate);
        let existing = self.store
            .active_appointments_between(clinic_id, practitioner_id, from, to)
            .await?;

        let conflicts: Vec<Appointment> = find_conflicts(&candidate, &existing, exclude_appointment_id)
            .into_iter()
            .cloned()
            .collect();

        if !conflicts.is_empty() {
            warn!(
                "Conflict detected for practitioner {} - {} conflicting appointments",
                practitioner_id, conflicts.len()
            );
        }

        Ok(conflicts)
    }
}
