use async_trait::async_trait;

use crate::backend::{PersistenceError, SchedulingBackend};
use crate::model::*;

use super::Store;

#[async_trait]
impl SchedulingBackend for Store {
    async fn list_appointments(
        &self,
        location_id: LocationId,
        range: Span,
    ) -> Result<Vec<Appointment>, PersistenceError> {
        Ok(Store::list_appointments(self, location_id, range).await?)
    }

    async fn list_eligible_staff(
        &self,
        location_id: LocationId,
        role: Role,
    ) -> Result<Vec<StaffMember>, PersistenceError> {
        Ok(Store::list_eligible_staff(self, location_id, role).await)
    }

    async fn get_priority_staff(
        &self,
        location_id: LocationId,
        span: Span,
    ) -> Result<Option<StaffMember>, PersistenceError> {
        Ok(Store::get_priority_staff(self, location_id, span).await)
    }

    async fn create_appointment(
        &self,
        fields: &NewAppointment,
    ) -> Result<AppointmentId, PersistenceError> {
        Ok(Store::create_appointment(self, fields).await?)
    }

    async fn attach_participants(
        &self,
        appointment_id: AppointmentId,
        staff_ids: &[StaffId],
    ) -> Result<(), PersistenceError> {
        Ok(Store::attach_participants(self, appointment_id, staff_ids).await?)
    }

    async fn delete_appointment(&self, appointment_id: AppointmentId) -> Result<(), PersistenceError> {
        Ok(Store::delete_appointment(self, appointment_id).await?)
    }

    async fn book_appointment_atomic(
        &self,
        fields: &NewAppointment,
        staff_ids: &[StaffId],
    ) -> Result<AppointmentId, PersistenceError> {
        Ok(Store::book_appointment_atomic(self, fields, staff_ids).await?)
    }
}
