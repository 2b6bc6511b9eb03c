use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, Pagination};
use crate::services::interval::Interval;
use crate::store::{AppointmentStore, NewAppointment, StatusChange, StoreError};

#[derive(Default)]
struct MemoryState {
    appointments: HashMap<Uuid, Appointment>,
    contacts: HashSet<(Uuid, Uuid)>,
    practitioners: HashSet<(Uuid, Uuid)>,
    tags: HashSet<(Uuid, Uuid)>,
}

impl MemoryState {
    fn overlaps_existing(&self, clinic_id: Uuid, practitioner_id: Uuid, candidate: &Interval, exclude: Option<Uuid>) -> bool {
        self.appointments.values().any(|existing| {
            existing.clinic_id == clinic_id
                && existing.practitioner_id == practitioner_id
                && existing.is_blocking()
                && Some(existing.id) != exclude
                && existing.interval().overlaps(candidate)
        })
    }

    fn scoped_mut(&mut self, clinic_id: Uuid, appointment_id: Uuid) -> Result<&mut Appointment, StoreError> {
        self.appointments
            .get_mut(&appointment_id)
            .filter(|appointment| appointment.clinic_id == clinic_id)
            .ok_or(StoreError::NotFound)
    }
}

/// Process-local store. Each write holds the lock across its overlap check,
/// so concurrent bookings of the same interval cannot both succeed.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contact(&self, clinic_id: Uuid, contact_id: Uuid) {
        self.state.write().await.contacts.insert((clinic_id, contact_id));
    }

    pub async fn add_practitioner(&self, clinic_id: Uuid, practitioner_id: Uuid) {
        self.state.write().await.practitioners.insert((clinic_id, practitioner_id));
    }

    pub async fn add_tag(&self, clinic_id: Uuid, tag_id: Uuid) {
        self.state.write().await.tags.insert((clinic_id, tag_id));
    }

    pub async fn appointment_count(&self) -> usize {
        self.state.read().await.appointments.len()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn contact_exists(&self, clinic_id: Uuid, contact_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.read().await.contacts.contains(&(clinic_id, contact_id)))
    }

    async fn practitioner_exists(&self, clinic_id: Uuid, practitioner_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.read().await.practitioners.contains(&(clinic_id, practitioner_id)))
    }

    async fn tag_exists(&self, clinic_id: Uuid, tag_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.read().await.tags.contains(&(clinic_id, tag_id)))
    }

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state.read().await.appointments
            .get(&appointment_id)
            .filter(|appointment| appointment.clinic_id == clinic_id)
            .cloned())
    }

    async fn active_appointments_between(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.read().await;
        let mut found: Vec<Appointment> = state.appointments.values()
            .filter(|appointment| {
                appointment.clinic_id == clinic_id
                    && appointment.practitioner_id == practitioner_id
                    && appointment.is_blocking()
                    && appointment.scheduled_start >= from
                    && appointment.scheduled_start < to
            })
            .cloned()
            .collect();
        found.sort_by_key(|appointment| (appointment.scheduled_start, appointment.id));
        Ok(found)
    }

    async fn insert_appointment(&self, new: NewAppointment) -> Result<Appointment, StoreError> {
        let mut state = self.state.write().await;

        let candidate = Interval::new(new.scheduled_start, new.duration_minutes);
        if new.status.is_blocking()
            && state.overlaps_existing(new.clinic_id, new.practitioner_id, &candidate, None)
        {
            return Err(StoreError::Overlap);
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id: new.clinic_id,
            contact_id: new.contact_id,
            practitioner_id: new.practitioner_id,
            scheduled_start: new.scheduled_start,
            duration_minutes: Some(new.duration_minutes),
            status: new.status,
            cancelled_by: None,
            doctor_name: new.doctor_name,
            specialty: new.specialty,
            appointment_type: new.appointment_type,
            session_notes: new.session_notes,
            cancellation_reason: None,
            payment_status: new.payment_status,
            payment_amount: new.payment_amount,
            tag_id: new.tag_id,
            created_at: now,
            updated_at: now,
        };

        debug!("Stored appointment {} in memory", appointment.id);
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update_interval(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        scheduled_start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, StoreError> {
        let mut state = self.state.write().await;

        let (practitioner_id, blocking) = {
            let current = state.scoped_mut(clinic_id, appointment_id)?;
            if current.status != expected {
                return Err(StoreError::StaleStatus);
            }
            (current.practitioner_id, current.is_blocking())
        };

        let candidate = Interval::new(scheduled_start, duration_minutes);
        if blocking && state.overlaps_existing(clinic_id, practitioner_id, &candidate, Some(appointment_id)) {
            return Err(StoreError::Overlap);
        }

        let appointment = state.scoped_mut(clinic_id, appointment_id)?;
        appointment.scheduled_start = scheduled_start;
        appointment.duration_minutes = Some(duration_minutes);
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    async fn update_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        change: StatusChange,
    ) -> Result<Appointment, StoreError> {
        let mut state = self.state.write().await;
        let appointment = state.scoped_mut(clinic_id, appointment_id)?;

        if appointment.status != expected {
            return Err(StoreError::StaleStatus);
        }

        appointment.status = change.status;
        if change.cancelled_by.is_some() {
            appointment.cancelled_by = change.cancelled_by;
        }
        if change.cancellation_reason.is_some() {
            appointment.cancellation_reason = change.cancellation_reason;
        }
        if change.session_notes.is_some() {
            appointment.session_notes = change.session_notes;
        }
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentFilter,
        page: Pagination,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<&Appointment> = state.appointments.values()
            .filter(|appointment| appointment.clinic_id == clinic_id && filter.matches(appointment))
            .collect();
        matching.sort_by_key(|appointment| (appointment.scheduled_start, appointment.id));

        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }
}
