use crate::limits::MAX_APPOINTMENT_MINUTES;
use crate::model::*;

use super::{AppointmentOverlapIndex, EligibleStaffResolver, ScheduleError, StaffOrdering, TimeGrid};

/// Reject zero or oversized durations; returns the duration in ms.
pub fn validate_duration(minutes: u32) -> Result<Ms, ScheduleError> {
    if minutes == 0 {
        return Err(ScheduleError::invalid("appointment duration must be positive"));
    }
    if minutes > MAX_APPOINTMENT_MINUTES {
        return Err(ScheduleError::invalid(format!(
            "appointment duration {minutes} min exceeds {MAX_APPOINTMENT_MINUTES} min"
        )));
    }
    Ok(Ms::from(minutes) * MINUTE_MS)
}

/// Combines the overlap index and staff resolver into per-slot availability.
pub struct SlotAssignmentPolicy<'a> {
    index: &'a AppointmentOverlapIndex,
    resolver: EligibleStaffResolver<'a>,
    duration_ms: Ms,
    now: Ms,
}

impl<'a> SlotAssignmentPolicy<'a> {
    pub fn new(
        index: &'a AppointmentOverlapIndex,
        resolver: EligibleStaffResolver<'a>,
        duration_minutes: u32,
        now: Ms,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            index,
            resolver,
            duration_ms: validate_duration(duration_minutes)?,
            now,
        })
    }

    pub fn duration_ms(&self) -> Ms {
        self.duration_ms
    }

    pub fn with_duration(self, duration_minutes: u32) -> Result<Self, ScheduleError> {
        Ok(Self {
            duration_ms: validate_duration(duration_minutes)?,
            ..self
        })
    }

    pub fn evaluate_slot(&self, slot: &TimeSlot, ordering: StaffOrdering) -> AvailabilityResult {
        let span = slot.span_for(self.duration_ms);
        let eligible = self
            .resolver
            .resolve(ordering, |id| self.index.busy_with(id, &span).is_some());

        // Past slots are never bookable, whoever is free.
        let bookable = !eligible.is_empty() && slot.start >= self.now;
        let assignee = if bookable {
            eligible.first().map(|m| (*m).clone())
        } else {
            None
        };

        AvailabilityResult {
            slot: *slot,
            bookable,
            eligible: eligible.iter().map(|m| m.id).collect(),
            assignee,
        }
    }

    pub fn evaluate_grid(
        &self,
        grid: &TimeGrid,
        ordering: impl Fn(&TimeSlot) -> StaffOrdering,
    ) -> Vec<AvailabilityResult> {
        grid.iter()
            .map(|slot| self.evaluate_slot(&slot, ordering(&slot)))
            .collect()
    }
}
