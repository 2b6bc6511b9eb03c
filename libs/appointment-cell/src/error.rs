use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, ErrorKind, Slot};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Contact,
    Practitioner,
    Tag,
    Appointment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Contact => write!(f, "Contact"),
            Entity::Practitioner => write!(f, "Practitioner"),
            Entity::Tag => write!(f, "Tag"),
            Entity::Appointment => write!(f, "Appointment"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum SchedulingError {
    #[error("Invalid field `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} {id} not found in this clinic")]
    NotFound { entity: Entity, id: Uuid },

    #[error("Requested time conflicts with {} existing appointment(s)", .conflicts.len())]
    Conflict {
        conflicts: Vec<Appointment>,
        suggested_slots: Vec<Slot>,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment in status {status} cannot be rescheduled")]
    NotReschedulable { status: AppointmentStatus },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SchedulingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SchedulingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        SchedulingError::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::Validation { .. } => ErrorKind::ValidationError,
            SchedulingError::NotFound { .. } => ErrorKind::NotFound,
            SchedulingError::Conflict { .. } => ErrorKind::Conflict,
            SchedulingError::InvalidTransition { .. }
            | SchedulingError::NotReschedulable { .. } => ErrorKind::InvalidTransition,
            SchedulingError::Storage(_) => ErrorKind::StorageError,
        }
    }

    /// Message safe to hand to callers. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            SchedulingError::Storage(_) => "Failed to access appointment storage".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for SchedulingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Overlap => SchedulingError::Conflict {
                conflicts: Vec::new(),
                suggested_slots: Vec::new(),
            },
            other => SchedulingError::Storage(other.to_string()),
        }
    }
}
