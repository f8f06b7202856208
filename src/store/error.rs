use thiserror::Error;
use ulid::Ulid;

use crate::backend::PersistenceError;
use crate::model::{AppointmentId, StaffId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("staff {staff_id} already booked by appointment {appointment_id}")]
    Conflict {
        staff_id: StaffId,
        appointment_id: AppointmentId,
    },
    #[error("staff {staff_id} already attached to appointment {appointment_id}")]
    DuplicateParticipant {
        appointment_id: AppointmentId,
        staff_id: StaffId,
    },
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        PersistenceError::new(e.to_string())
    }
}
