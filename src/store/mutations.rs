use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_assignee_free, validate_fields};
use super::{Store, StoreError, WalCommand};

impl Store {
    pub async fn create_location(&self, id: LocationId, name: Option<String>) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        if self.locations.len() >= MAX_LOCATIONS_PER_BUSINESS {
            return Err(StoreError::LimitExceeded("too many locations"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(StoreError::LimitExceeded("location name too long"));
        }
        if self.locations.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let event = Event::LocationCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.locations
            .insert(id, Arc::new(RwLock::new(LocationState::new(id, name))));
        Ok(())
    }

    /// Insert or replace a roster profile.
    pub async fn upsert_staff(&self, member: StaffMember) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        if member.display_name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("display name too long"));
        }
        if !self.staff.contains_key(&member.id) && self.staff.len() >= MAX_STAFF_PER_BUSINESS {
            return Err(StoreError::LimitExceeded("too many staff"));
        }

        let event = Event::StaffUpserted { member: member.clone() };
        self.wal_append(&event).await?;
        self.staff.insert(member.id, member);
        Ok(())
    }

    /// Add `staff_id` to the location roster under `role`. Granting an
    /// existing membership again only updates `self_only`.
    pub async fn grant_membership(&self, membership: Membership) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        if !self.staff.contains_key(&membership.staff_id) {
            return Err(StoreError::NotFound(membership.staff_id));
        }
        let ls = self
            .get_location(&membership.location_id)
            .ok_or(StoreError::NotFound(membership.location_id))?;
        let mut guard = ls.write().await;
        let event = Event::MembershipGranted { membership };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn revoke_membership(
        &self,
        location_id: LocationId,
        staff_id: StaffId,
        role: Role,
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let ls = self
            .get_location(&location_id)
            .ok_or(StoreError::NotFound(location_id))?;
        let mut guard = ls.write().await;
        if !guard
            .memberships
            .iter()
            .any(|m| m.staff_id == staff_id && m.role == role)
        {
            return Err(StoreError::NotFound(staff_id));
        }
        let event = Event::MembershipRevoked { location_id, staff_id, role };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// First half of the two-step write. The assignee exclusion is checked
    /// here; participants come later.
    pub async fn create_appointment(&self, fields: &NewAppointment) -> Result<AppointmentId, StoreError> {
        let _gate = self.write_gate.read().await;
        validate_fields(fields, self.business_id())?;
        let ls = self
            .get_location(&fields.location_id)
            .ok_or(StoreError::NotFound(fields.location_id))?;
        let mut guard = ls.write().await;

        if let Some(existing) = self.idempotency.get(&fields.idempotency_key) {
            debug!(key = %fields.idempotency_key, "create replayed");
            return Ok(*existing.value());
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_LOCATION {
            return Err(StoreError::LimitExceeded("too many appointments at location"));
        }
        check_assignee_free(&guard, &fields.assignee, &fields.span)?;

        let id = AppointmentId::new();
        let event = Event::AppointmentCreated {
            appointment: fields.clone().into_appointment(id, &[]),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn attach_participants(
        &self,
        appointment_id: AppointmentId,
        staff_ids: &[StaffId],
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let (location_id, mut guard) = self.resolve_appointment_write(&appointment_id).await?;
        let appt = guard
            .appointments
            .iter()
            .find(|a| a.id == appointment_id)
            .ok_or(StoreError::NotFound(appointment_id))?;

        if appt.participants.len() + staff_ids.len() > MAX_PARTICIPANTS_PER_APPOINTMENT {
            return Err(StoreError::LimitExceeded("too many participants"));
        }
        self.check_new_participants(appt, staff_ids)?;

        let event = Event::ParticipantsAttached {
            appointment_id,
            location_id,
            staff_ids: staff_ids.to_vec(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_appointment(&self, appointment_id: AppointmentId) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let (location_id, mut guard) = self.resolve_appointment_write(&appointment_id).await?;
        let event = Event::AppointmentDeleted {
            id: appointment_id,
            location_id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Check-and-insert of the appointment with all participants as one
    /// WAL record.
    pub async fn book_appointment_atomic(
        &self,
        fields: &NewAppointment,
        staff_ids: &[StaffId],
    ) -> Result<AppointmentId, StoreError> {
        let _gate = self.write_gate.read().await;
        validate_fields(fields, self.business_id())?;
        if staff_ids.len() > MAX_PARTICIPANTS_PER_APPOINTMENT {
            return Err(StoreError::LimitExceeded("too many participants"));
        }
        let ls = self
            .get_location(&fields.location_id)
            .ok_or(StoreError::NotFound(fields.location_id))?;
        let mut guard = ls.write().await;

        if let Some(existing) = self.idempotency.get(&fields.idempotency_key).map(|e| *e.value()) {
            debug!(key = %fields.idempotency_key, "booking replayed");
            // An earlier two-step write under this key may have stopped
            // before its participants landed; complete it.
            let missing = match guard.appointments.iter().find(|a| a.id == existing) {
                Some(appt) => {
                    let missing: Vec<StaffId> = staff_ids
                        .iter()
                        .copied()
                        .filter(|id| !appt.has_participant(id))
                        .collect();
                    if appt.participants.len() + missing.len() > MAX_PARTICIPANTS_PER_APPOINTMENT {
                        return Err(StoreError::LimitExceeded("too many participants"));
                    }
                    self.check_new_participants(appt, &missing)?;
                    missing
                }
                None => Vec::new(),
            };
            if !missing.is_empty() {
                let event = Event::ParticipantsAttached {
                    appointment_id: existing,
                    location_id: fields.location_id,
                    staff_ids: missing,
                };
                self.persist_and_apply(&mut guard, &event).await?;
            }
            return Ok(existing);
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_LOCATION {
            return Err(StoreError::LimitExceeded("too many appointments at location"));
        }

        let id = AppointmentId::new();
        let appointment = fields.clone().into_appointment(id, &[]);
        self.check_new_participants(&appointment, staff_ids)?;
        check_assignee_free(&guard, &fields.assignee, &fields.span)?;

        let event = Event::AppointmentBooked {
            appointment: fields.clone().into_appointment(id, staff_ids),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    /// Every staff id must exist and appear at most once on the appointment.
    fn check_new_participants(&self, appt: &Appointment, staff_ids: &[StaffId]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(staff_ids.len());
        for staff_id in staff_ids {
            if !self.staff.contains_key(staff_id) {
                return Err(StoreError::NotFound(*staff_id));
            }
            if !seen.insert(*staff_id) || appt.has_participant(staff_id) {
                return Err(StoreError::DuplicateParticipant {
                    appointment_id: appt.id,
                    staff_id: *staff_id,
                });
            }
        }
        Ok(())
    }

    /// Rewrite the WAL with just enough events to rebuild current state.
    /// Writers are held off until the rewritten log is in place.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;
        let mut events: Vec<Event> = self
            .staff
            .iter()
            .map(|e| Event::StaffUpserted { member: e.value().clone() })
            .collect();

        let shared: Vec<_> = self.locations.iter().map(|e| e.value().clone()).collect();
        for ls in shared {
            let guard = ls.read().await;
            events.push(Event::LocationCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            events.extend(
                guard
                    .memberships
                    .iter()
                    .map(|m| Event::MembershipGranted { membership: m.clone() }),
            );
            events.extend(
                guard
                    .appointments
                    .iter()
                    .map(|a| Event::AppointmentBooked { appointment: a.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
