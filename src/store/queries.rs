use crate::limits::*;
use crate::model::*;
use crate::schedule::BookingScope;

use super::conflict::staff_is_free;
use super::{Store, StoreError};

impl Store {
    /// Appointments at a location overlapping `range`. Unknown locations
    /// have no appointments.
    pub async fn list_appointments(
        &self,
        location_id: LocationId,
        range: Span,
    ) -> Result<Vec<Appointment>, StoreError> {
        if range.start >= range.end {
            return Err(StoreError::Invalid("empty query window"));
        }
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(StoreError::LimitExceeded("query window too wide"));
        }
        let Some(ls) = self.get_location(&location_id) else {
            return Ok(Vec::new());
        };
        let guard = ls.read().await;
        Ok(guard.overlapping(&range).cloned().collect())
    }

    /// Roster for `role` at a location, in the order memberships were granted.
    pub async fn list_eligible_staff(&self, location_id: LocationId, role: Role) -> Vec<StaffMember> {
        let Some(ls) = self.get_location(&location_id) else {
            return Vec::new();
        };
        let guard = ls.read().await;
        guard
            .members_with_role(role)
            .filter_map(|m| self.staff.get(&m.staff_id).map(|e| e.value().clone()))
            .collect()
    }

    /// Free closer with the fewest assigned appointments at the location;
    /// ties go to the earliest membership.
    pub async fn get_priority_staff(&self, location_id: LocationId, span: Span) -> Option<StaffMember> {
        let ls = self.get_location(&location_id)?;
        let guard = ls.read().await;
        guard
            .members_with_role(Role::Closer)
            .filter(|m| staff_is_free(&guard, &m.staff_id, &span))
            .enumerate()
            .min_by_key(|(order, m)| {
                let load = guard
                    .appointments
                    .iter()
                    .filter(|a| a.assignee == m.staff_id)
                    .count();
                (load, *order)
            })
            .and_then(|(_, m)| self.staff.get(&m.staff_id).map(|e| e.value().clone()))
    }

    pub async fn membership(&self, location_id: LocationId, staff_id: StaffId, role: Role) -> Option<Membership> {
        let ls = self.get_location(&location_id)?;
        let guard = ls.read().await;
        guard
            .members_with_role(role)
            .find(|m| m.staff_id == staff_id)
            .cloned()
    }

    /// `SelfOnly` when the location restricts `role` holders to themselves.
    pub async fn booking_scope(&self, location_id: LocationId, staff_id: StaffId, role: Role) -> BookingScope {
        match self.membership(location_id, staff_id, role).await {
            Some(m) if m.self_only => BookingScope::SelfOnly,
            _ => BookingScope::Open,
        }
    }

    pub fn staff_member(&self, staff_id: &StaffId) -> Option<StaffMember> {
        self.staff.get(staff_id).map(|e| e.value().clone())
    }

    pub async fn appointment(&self, appointment_id: &AppointmentId) -> Option<Appointment> {
        let location_id = self.get_location_for_appointment(appointment_id)?;
        let ls = self.get_location(&location_id)?;
        let guard = ls.read().await;
        guard.appointments.iter().find(|a| a.id == *appointment_id).cloned()
    }

    pub fn location_ids(&self) -> Vec<LocationId> {
        self.locations.iter().map(|e| *e.key()).collect()
    }
}
