use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use futures::future::try_join_all;
use tracing::debug;

use crate::backend::SchedulingBackend;
use crate::model::*;

use super::{
    AppointmentOverlapIndex, BookingScope, EligibleStaffResolver, GridConfig, OverlapRule,
    ScheduleError, SlotAssignmentPolicy, StaffOrdering, TimeGrid, validate_duration,
};

/// How the default assignee is chosen among free staff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentMode {
    #[default]
    RosterOrder,
    /// Ask the backend ranking for every slot.
    Priority,
}

/// Everything a scheduling screen passes in to show one day.
#[derive(Debug, Clone)]
pub struct DayRequest {
    pub location_id: LocationId,
    pub day: NaiveDate,
    pub acting_user: StaffMember,
    pub role: Role,
    pub scope: BookingScope,
    pub mode: AssignmentMode,
    pub duration_minutes: u32,
}

/// Fetches a day's snapshot from the backend and evaluates the grid.
pub struct DayPlanner<B: ?Sized> {
    backend: Arc<B>,
    tz: Tz,
    grid: GridConfig,
    rule: OverlapRule,
}

impl<B: SchedulingBackend + ?Sized> DayPlanner<B> {
    pub fn new(backend: Arc<B>, tz: Tz) -> Self {
        Self {
            backend,
            tz,
            grid: GridConfig::default(),
            rule: OverlapRule::default(),
        }
    }

    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_overlap_rule(mut self, rule: OverlapRule) -> Self {
        self.rule = rule;
        self
    }

    /// Fresh snapshot + full-grid evaluation. Run again whenever the
    /// selected day changes.
    pub async fn plan_day(&self, request: DayRequest, now: Ms) -> Result<DaySchedule, ScheduleError> {
        let duration_ms = validate_duration(request.duration_minutes)?;
        let grid = TimeGrid::new(request.day, self.tz, self.grid)?;
        let window = grid.fetch_window(duration_ms);
        let location_id = request.location_id;

        let (appointments, roster) = futures::try_join!(
            self.backend.list_appointments(location_id, window),
            self.backend.list_eligible_staff(location_id, request.role),
        )?;

        let priorities: HashMap<Ms, Option<StaffId>> = match request.mode {
            AssignmentMode::RosterOrder => HashMap::new(),
            AssignmentMode::Priority => {
                let lookups = grid.iter().map(|slot| {
                    let span = slot.span_for(duration_ms);
                    async move {
                        let ranked = self.backend.get_priority_staff(location_id, span).await?;
                        Ok::<_, ScheduleError>((slot.start, ranked.map(|m| m.id)))
                    }
                });
                try_join_all(lookups).await?.into_iter().collect()
            }
        };

        let index = AppointmentOverlapIndex::new(&appointments, self.rule);
        let slots = {
            let resolver =
                EligibleStaffResolver::new(&roster, request.role, &request.acting_user, request.scope);
            let policy = SlotAssignmentPolicy::new(&index, resolver, request.duration_minutes, now)?;
            policy.evaluate_grid(&grid, |slot| ordering_for(request.mode, &priorities, slot))
        };

        metrics::counter!(crate::observability::DAY_PLANS_TOTAL).increment(1);
        debug!(
            location = %location_id,
            day = %request.day,
            appointments = appointments.len(),
            roster = roster.len(),
            bookable = slots.iter().filter(|s| s.bookable).count(),
            "planned day"
        );

        Ok(DaySchedule {
            request,
            grid,
            index,
            roster,
            priorities,
            slots,
        })
    }
}

fn ordering_for(
    mode: AssignmentMode,
    priorities: &HashMap<Ms, Option<StaffId>>,
    slot: &TimeSlot,
) -> StaffOrdering {
    match mode {
        AssignmentMode::RosterOrder => StaffOrdering::Roster,
        AssignmentMode::Priority => {
            StaffOrdering::Priority(priorities.get(&slot.start).copied().flatten())
        }
    }
}

/// One evaluated day, holding the snapshot it was computed from.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    request: DayRequest,
    grid: TimeGrid,
    index: AppointmentOverlapIndex,
    roster: Vec<StaffMember>,
    priorities: HashMap<Ms, Option<StaffId>>,
    slots: Vec<AvailabilityResult>,
}

impl DaySchedule {
    pub fn slots(&self) -> &[AvailabilityResult] {
        &self.slots
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn index(&self) -> &AppointmentOverlapIndex {
        &self.index
    }

    pub fn roster(&self) -> &[StaffMember] {
        &self.roster
    }

    pub fn request(&self) -> &DayRequest {
        &self.request
    }

    /// Recompute only the selected slot after a duration change. The
    /// snapshot is reused; the other slots are untouched.
    pub fn reevaluate_slot(
        &self,
        slot_index: usize,
        duration_minutes: u32,
        now: Ms,
    ) -> Result<AvailabilityResult, ScheduleError> {
        let slot = self.grid.slot(slot_index).ok_or_else(|| {
            ScheduleError::invalid(format!(
                "slot {slot_index} outside grid of {}",
                self.grid.len()
            ))
        })?;
        let resolver = EligibleStaffResolver::new(
            &self.roster,
            self.request.role,
            &self.request.acting_user,
            self.request.scope,
        );
        let policy = SlotAssignmentPolicy::new(&self.index, resolver, duration_minutes, now)?;
        Ok(policy.evaluate_slot(&slot, ordering_for(self.request.mode, &self.priorities, &slot)))
    }
}
