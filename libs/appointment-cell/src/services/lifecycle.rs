// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::models::AppointmentStatus;

/// What a cancellation request should do given the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationOutcome {
    Cancel,
    AlreadyCancelled,
}

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Agendada => &[
                AppointmentStatus::Confirmada,
                AppointmentStatus::Realizada,
                AppointmentStatus::Faltou,
                AppointmentStatus::Cancelada,
            ],
            AppointmentStatus::Confirmada => &[
                AppointmentStatus::Realizada,
                AppointmentStatus::Faltou,
                AppointmentStatus::Cancelada,
            ],
            // Terminal states
            AppointmentStatus::Realizada
            | AppointmentStatus::Faltou
            | AppointmentStatus::Cancelada => &[],
        }
    }

    pub fn can_transition(&self, from: AppointmentStatus, to: AppointmentStatus) -> bool {
        self.get_valid_transitions(from).contains(&to)
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.can_transition(current_status, new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(SchedulingError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Rescheduling keeps the status and is only possible before the
    /// appointment reaches a terminal state.
    pub fn validate_reschedule(&self, current_status: AppointmentStatus) -> Result<(), SchedulingError> {
        if current_status.is_terminal() {
            warn!("Reschedule attempted on appointment in terminal status {}", current_status);
            return Err(SchedulingError::NotReschedulable { status: current_status });
        }
        Ok(())
    }

    /// Cancelling twice is a no-op; cancelling a completed or missed
    /// appointment is an illegal transition.
    pub fn validate_cancellation(&self, current_status: AppointmentStatus) -> Result<CancellationOutcome, SchedulingError> {
        if current_status == AppointmentStatus::Cancelada {
            return Ok(CancellationOutcome::AlreadyCancelled);
        }
        self.validate_status_transition(current_status, AppointmentStatus::Cancelada)?;
        Ok(CancellationOutcome::Cancel)
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
