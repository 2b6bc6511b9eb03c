// libs/appointment-cell/src/services/scheduling.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Entity, SchedulingError};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, AvailabilityRequest, CancelAppointmentRequest,
    CancelledBy, ConflictCheckRequest, CreateAppointmentRequest, ListAppointmentsRequest,
    OperationResult, Pagination, RescheduleAppointmentRequest, SchedulingRules, Slot,
    UpdateStatusRequest, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::interval::Interval;
use crate::services::lifecycle::{AppointmentLifecycleService, CancellationOutcome};
use crate::services::slots::{resolve_lenient, AvailabilityService};
use crate::store::{AppointmentStore, NewAppointment, StatusChange, StoreError};
use crate::validation::{
    parse_date, parse_time, resolve_local, validate_duration, validate_working_hours,
};

/// Orchestrates every scheduling operation for a clinic. Built once at
/// startup around its store and shared behind an `Arc`.
pub struct SchedulingAgent {
    store: Arc<dyn AppointmentStore>,
    conflict_service: ConflictDetectionService,
    availability_service: AvailabilityService,
    lifecycle_service: AppointmentLifecycleService,
    rules: SchedulingRules,
}

impl SchedulingAgent {
    pub fn new(store: Arc<dyn AppointmentStore>, rules: SchedulingRules) -> Self {
        let conflict_service = ConflictDetectionService::new(Arc::clone(&store));
        let availability_service = AvailabilityService::new(
            Arc::clone(&store),
            rules.timezone,
            rules.slot_step_minutes,
        );

        Self {
            store,
            conflict_service,
            availability_service,
            lifecycle_service: AppointmentLifecycleService::new(),
            rules,
        }
    }

    pub fn allowed_transitions(&self, status: AppointmentStatus) -> &'static [AppointmentStatus] {
        self.lifecycle_service.get_valid_transitions(status)
    }

    // ==============================================================================
    // PUBLIC OPERATIONS
    // ==============================================================================

    pub async fn create_appointment(&self, request: CreateAppointmentRequest) -> OperationResult<Appointment> {
        let result = self.try_create_appointment(request).await;
        OperationResult::from_appointment(log_outcome("create_appointment", result))
    }

    pub async fn update_status(&self, request: UpdateStatusRequest) -> OperationResult<Appointment> {
        let result = self.try_update_status(request).await;
        OperationResult::from_appointment(log_outcome("update_status", result))
    }

    pub async fn reschedule_appointment(&self, request: RescheduleAppointmentRequest) -> OperationResult<Appointment> {
        let result = self.try_reschedule_appointment(request).await;
        OperationResult::from_appointment(log_outcome("reschedule_appointment", result))
    }

    pub async fn cancel_appointment(&self, request: CancelAppointmentRequest) -> OperationResult<Appointment> {
        let result = self.try_cancel_appointment(request).await;
        OperationResult::from_appointment(log_outcome("cancel_appointment", result))
    }

    pub async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> OperationResult<Appointment> {
        let result = self.load_appointment(clinic_id, appointment_id).await;
        OperationResult::from_appointment(log_outcome("get_appointment", result))
    }

    pub async fn get_available_slots(&self, request: AvailabilityRequest) -> OperationResult<Vec<Slot>> {
        let result = self.try_get_available_slots(request).await;
        OperationResult::from_result(log_outcome("get_available_slots", result))
    }

    pub async fn check_conflicts(&self, request: ConflictCheckRequest) -> OperationResult<Vec<Appointment>> {
        let result = self.try_check_conflicts(request).await;
        OperationResult::from_result(log_outcome("check_conflicts", result))
    }

    pub async fn list_appointments(&self, request: ListAppointmentsRequest) -> OperationResult<Vec<Appointment>> {
        let result = self.try_list_appointments(request).await;
        OperationResult::from_result(log_outcome("list_appointments", result))
    }

    // ==============================================================================
    // OPERATION BODIES
    // ==============================================================================

    async fn try_create_appointment(&self, request: CreateAppointmentRequest) -> Result<Appointment, SchedulingError> {
        let date = parse_date("date", &request.date)?;
        let time = parse_time("time", &request.time)?;
        let duration_minutes = validate_duration(&self.rules, request.duration_minutes)?;
        let scheduled_start = resolve_local(self.rules.timezone, date, time)?;

        let status = request.status.unwrap_or(AppointmentStatus::Agendada);
        if !matches!(status, AppointmentStatus::Agendada | AppointmentStatus::Confirmada) {
            return Err(SchedulingError::validation(
                "status",
                format!("new appointments cannot start as {}", status),
            ));
        }
        if request.payment_amount.is_some_and(|amount| amount < 0) {
            return Err(SchedulingError::validation("paymentAmount", "must not be negative"));
        }

        info!(
            "Creating appointment for contact {} with practitioner {} at {}",
            request.contact_id, request.practitioner_id, scheduled_start
        );

        if !self.store.contact_exists(request.clinic_id, request.contact_id).await? {
            return Err(SchedulingError::not_found(Entity::Contact, request.contact_id));
        }
        self.ensure_practitioner(request.clinic_id, request.practitioner_id).await?;
        if let Some(tag_id) = request.tag_id {
            if !self.store.tag_exists(request.clinic_id, tag_id).await? {
                return Err(SchedulingError::not_found(Entity::Tag, tag_id));
            }
        }

        let candidate = Interval::new(scheduled_start, duration_minutes);
        let conflicts = self.conflict_service
            .check_conflicts(request.clinic_id, request.practitioner_id, candidate, None)
            .await?;
        if !conflicts.is_empty() {
            return Err(self.conflict_with_suggestions(
                request.clinic_id, request.practitioner_id, date, duration_minutes, conflicts, None,
            ).await);
        }

        let new_appointment = NewAppointment {
            clinic_id: request.clinic_id,
            contact_id: request.contact_id,
            practitioner_id: request.practitioner_id,
            scheduled_start,
            duration_minutes,
            status,
            doctor_name: request.doctor_name,
            specialty: request.specialty,
            appointment_type: request.appointment_type,
            session_notes: request.session_notes,
            payment_status: request.payment_status.unwrap_or_default(),
            payment_amount: request.payment_amount,
            tag_id: request.tag_id,
        };

        match self.store.insert_appointment(new_appointment).await {
            Ok(appointment) => {
                info!("Appointment {} booked with practitioner {}", appointment.id, appointment.practitioner_id);
                Ok(appointment)
            }
            Err(StoreError::Overlap) => Err(self.overlap_rejected(
                request.clinic_id, request.practitioner_id, date, candidate, None,
            ).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_update_status(&self, request: UpdateStatusRequest) -> Result<Appointment, SchedulingError> {
        let mut current = self.load_appointment(request.clinic_id, request.appointment_id).await?;

        let change = StatusChange {
            status: request.status,
            // Status changes made through this path come from clinic staff.
            cancelled_by: (request.status == AppointmentStatus::Cancelada).then_some(CancelledBy::Practitioner),
            cancellation_reason: None,
            session_notes: request.notes,
        };

        // One retry if another writer changed the status between our read
        // and the conditional update.
        for _ in 0..2 {
            self.lifecycle_service.validate_status_transition(current.status, request.status)?;

            match self.store
                .update_status(request.clinic_id, request.appointment_id, current.status, change.clone())
                .await
            {
                Ok(updated) => {
                    info!("Appointment {} status {} -> {}", updated.id, current.status, updated.status);
                    return Ok(updated);
                }
                Err(StoreError::StaleStatus) => {
                    warn!("Status of appointment {} changed concurrently, reloading", request.appointment_id);
                    current = self.load_appointment(request.clinic_id, request.appointment_id).await?;
                }
                Err(StoreError::NotFound) => {
                    return Err(SchedulingError::not_found(Entity::Appointment, request.appointment_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SchedulingError::Storage(format!(
            "appointment {} kept changing while updating its status",
            request.appointment_id
        )))
    }

    async fn try_reschedule_appointment(&self, request: RescheduleAppointmentRequest) -> Result<Appointment, SchedulingError> {
        let date = parse_date("date", &request.date)?;
        let time = parse_time("time", &request.time)?;
        if let Some(minutes) = request.duration_minutes {
            validate_duration(&self.rules, Some(minutes))?;
        }
        let scheduled_start = resolve_local(self.rules.timezone, date, time)?;

        let mut current = self.load_appointment(request.clinic_id, request.appointment_id).await?;

        for _ in 0..2 {
            self.lifecycle_service.validate_reschedule(current.status)?;

            let duration_minutes = request.duration_minutes.unwrap_or_else(|| current.effective_duration());
            let candidate = Interval::new(scheduled_start, duration_minutes);

            debug!(
                "Rescheduling appointment {} from {} to {}",
                current.id, current.scheduled_start, scheduled_start
            );

            let conflicts = self.conflict_service
                .check_conflicts(current.clinic_id, current.practitioner_id, candidate, Some(current.id))
                .await?;
            if !conflicts.is_empty() {
                return Err(self.conflict_with_suggestions(
                    current.clinic_id, current.practitioner_id, date, duration_minutes, conflicts, Some(current.id),
                ).await);
            }

            match self.store
                .update_interval(current.clinic_id, current.id, current.status, scheduled_start, duration_minutes)
                .await
            {
                Ok(updated) => {
                    info!("Appointment {} rescheduled to {}", updated.id, updated.scheduled_start);
                    return Ok(updated);
                }
                Err(StoreError::Overlap) => {
                    return Err(self.overlap_rejected(
                        current.clinic_id, current.practitioner_id, date, candidate, Some(current.id),
                    ).await);
                }
                Err(StoreError::StaleStatus) => {
                    warn!("Status of appointment {} changed while rescheduling, reloading", current.id);
                    current = self.load_appointment(request.clinic_id, request.appointment_id).await?;
                }
                Err(StoreError::NotFound) => {
                    return Err(SchedulingError::not_found(Entity::Appointment, request.appointment_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SchedulingError::Storage(format!(
            "appointment {} kept changing while rescheduling",
            request.appointment_id
        )))
    }

    async fn try_cancel_appointment(&self, request: CancelAppointmentRequest) -> Result<Appointment, SchedulingError> {
        let mut current = self.load_appointment(request.clinic_id, request.appointment_id).await?;

        for _ in 0..2 {
            if self.lifecycle_service.validate_cancellation(current.status)? == CancellationOutcome::AlreadyCancelled {
                debug!("Appointment {} already cancelled", current.id);
                return Ok(current);
            }

            let change = StatusChange {
                status: AppointmentStatus::Cancelada,
                cancelled_by: Some(request.cancelled_by),
                cancellation_reason: request.reason.clone(),
                session_notes: None,
            };

            match self.store
                .update_status(request.clinic_id, request.appointment_id, current.status, change)
                .await
            {
                Ok(cancelled) => {
                    info!("Appointment {} cancelled by {}", cancelled.id, request.cancelled_by);
                    return Ok(cancelled);
                }
                Err(StoreError::StaleStatus) => {
                    current = self.load_appointment(request.clinic_id, request.appointment_id).await?;
                }
                Err(StoreError::NotFound) => {
                    return Err(SchedulingError::not_found(Entity::Appointment, request.appointment_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SchedulingError::Storage(format!(
            "appointment {} kept changing while cancelling",
            request.appointment_id
        )))
    }

    async fn try_get_available_slots(&self, request: AvailabilityRequest) -> Result<Vec<Slot>, SchedulingError> {
        let date = parse_date("date", &request.date)?;
        let duration_minutes = validate_duration(&self.rules, request.duration_minutes)?;
        let hours = validate_working_hours(
            &self.rules,
            request.working_hours_start.as_deref(),
            request.working_hours_end.as_deref(),
        )?;

        self.ensure_practitioner(request.clinic_id, request.practitioner_id).await?;

        let generator = self.availability_service
            .generator_for(request.clinic_id, request.practitioner_id, date, duration_minutes, hours, None)
            .await?;

        Ok(generator.slots().collect())
    }

    async fn try_check_conflicts(&self, request: ConflictCheckRequest) -> Result<Vec<Appointment>, SchedulingError> {
        let date = parse_date("date", &request.date)?;
        let time = parse_time("time", &request.time)?;
        let duration_minutes = validate_duration(&self.rules, request.duration_minutes)?;
        let scheduled_start = resolve_local(self.rules.timezone, date, time)?;

        let candidate = Interval::new(scheduled_start, duration_minutes);
        Ok(self.conflict_service
            .check_conflicts(request.clinic_id, request.practitioner_id, candidate, request.exclude_appointment_id)
            .await?)
    }

    async fn try_list_appointments(&self, request: ListAppointmentsRequest) -> Result<Vec<Appointment>, SchedulingError> {
        let limit = request.limit.unwrap_or(DEFAULT_PAGE_LIMIT as i64);
        if limit < 1 || limit > MAX_PAGE_LIMIT as i64 {
            return Err(SchedulingError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_LIMIT),
            ));
        }
        let offset = request.offset.unwrap_or(0);
        if offset < 0 || offset > u32::MAX as i64 {
            return Err(SchedulingError::validation("offset", "must be a non-negative integer"));
        }

        let date_from = request.date_from.as_deref()
            .map(|value| parse_date("dateFrom", value))
            .transpose()?;
        let date_to = request.date_to.as_deref()
            .map(|value| parse_date("dateTo", value))
            .transpose()?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(SchedulingError::validation("dateFrom", "must not be after dateTo"));
            }
        }

        let filter = AppointmentFilter {
            practitioner_id: request.practitioner_id,
            contact_id: request.contact_id,
            status: request.status,
            date_from: date_from.map(|date| self.start_of_day(date)),
            // dateTo is inclusive of the whole day.
            date_to: date_to.map(|date| self.start_of_day(date + Duration::days(1))),
        };
        let page = Pagination {
            limit: limit as u32,
            offset: offset as u32,
        };

        debug!("Listing appointments for clinic {} with {:?} {:?}", request.clinic_id, filter, page);
        Ok(self.store.list_appointments(request.clinic_id, &filter, page).await?)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn load_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(clinic_id, appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found(Entity::Appointment, appointment_id))
    }

    async fn ensure_practitioner(&self, clinic_id: Uuid, practitioner_id: Uuid) -> Result<(), SchedulingError> {
        if !self.store.practitioner_exists(clinic_id, practitioner_id).await? {
            return Err(SchedulingError::not_found(Entity::Practitioner, practitioner_id));
        }
        Ok(())
    }

    fn start_of_day(&self, date: NaiveDate) -> chrono::DateTime<chrono::Utc> {
        resolve_lenient(self.rules.timezone, date.and_time(chrono::NaiveTime::MIN))
    }

    /// The first few free slots of the same day, for a conflict response.
    /// Failing to compute them never hides the conflict itself.
    async fn suggest_slots(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
    ) -> Vec<Slot> {
        match self.availability_service
            .generator_for(
                clinic_id,
                practitioner_id,
                date,
                duration_minutes,
                self.rules.default_working_hours,
                exclude_appointment_id,
            )
            .await
        {
            Ok(generator) => generator.slots().take(self.rules.suggested_slots_limit).collect(),
            Err(e) => {
                warn!("Could not compute suggested slots for practitioner {}: {}", practitioner_id, e);
                Vec::new()
            }
        }
    }

    async fn conflict_with_suggestions(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        duration_minutes: i32,
        conflicts: Vec<Appointment>,
        exclude_appointment_id: Option<Uuid>,
    ) -> SchedulingError {
        let suggested_slots = self
            .suggest_slots(clinic_id, practitioner_id, date, duration_minutes, exclude_appointment_id)
            .await;
        SchedulingError::Conflict { conflicts, suggested_slots }
    }

    /// The store refused the write because another booking committed first.
    /// Re-read to show the caller what now occupies the interval.
    async fn overlap_rejected(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        candidate: Interval,
        exclude_appointment_id: Option<Uuid>,
    ) -> SchedulingError {
        warn!(
            "Storage rejected overlapping booking for practitioner {} at {}",
            practitioner_id, candidate.start()
        );
        let conflicts = self.conflict_service
            .check_conflicts(clinic_id, practitioner_id, candidate, exclude_appointment_id)
            .await
            .unwrap_or_default();
        self.conflict_with_suggestions(
            clinic_id, practitioner_id, date, candidate.duration_minutes(), conflicts, exclude_appointment_id,
        ).await
    }
}

fn log_outcome<T>(operation: &str, result: Result<T, SchedulingError>) -> Result<T, SchedulingError> {
    if let Err(e) = &result {
        match e {
            SchedulingError::Storage(detail) => error!("{} failed: storage error: {}", operation, detail),
            SchedulingError::Conflict { conflicts, .. } => {
                info!("{} rejected: {} conflicting appointment(s)", operation, conflicts.len())
            }
            other => warn!("{} rejected: {}", operation, other),
        }
    }
    result
}
