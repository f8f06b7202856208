use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

/// A rejected backend call. The message is the backend's, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The persistence and roster service the scheduling core reads from and
/// writes to.
///
/// Implementations are expected to enforce the real conflict guarantee:
/// whatever the client computed from its snapshot, two overlapping
/// appointments for the same assignee must not both commit.
#[async_trait]
pub trait SchedulingBackend: Send + Sync {
    /// Appointments at `location_id` whose span overlaps `range`, with
    /// participants attached.
    async fn list_appointments(
        &self,
        location_id: LocationId,
        range: Span,
    ) -> Result<Vec<Appointment>, PersistenceError>;

    /// Staff holding `role` at `location_id`, in roster order.
    async fn list_eligible_staff(
        &self,
        location_id: LocationId,
        role: Role,
    ) -> Result<Vec<StaffMember>, PersistenceError>;

    /// Ranked suggestion for who should take `span`, if anyone.
    async fn get_priority_staff(
        &self,
        location_id: LocationId,
        span: Span,
    ) -> Result<Option<StaffMember>, PersistenceError>;

    async fn create_appointment(
        &self,
        fields: &NewAppointment,
    ) -> Result<AppointmentId, PersistenceError>;

    async fn attach_participants(
        &self,
        appointment_id: AppointmentId,
        staff_ids: &[StaffId],
    ) -> Result<(), PersistenceError>;

    /// Deletes the appointment and its participant rows.
    async fn delete_appointment(&self, appointment_id: AppointmentId)
    -> Result<(), PersistenceError>;

    /// Create the appointment and attach `staff_ids` as one unit.
    async fn book_appointment_atomic(
        &self,
        fields: &NewAppointment,
        staff_ids: &[StaffId],
    ) -> Result<AppointmentId, PersistenceError>;
}
