use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// How an existing appointment is compared against a candidate slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapRule {
    /// Busy if the slot starts at the appointment's start, at its end, or
    /// strictly inside it. Back-to-back bookings are therefore blocked.
    #[default]
    EdgeTouch,
    /// Plain `[a, b) ∩ [c, d) ≠ ∅`.
    HalfOpen,
}

impl OverlapRule {
    pub fn conflicts(&self, existing: &Span, slot: &Span) -> bool {
        match self {
            OverlapRule::EdgeTouch => {
                existing.start == slot.start
                    || existing.end == slot.start
                    || (existing.start < slot.start && existing.end > slot.start)
            }
            OverlapRule::HalfOpen => existing.overlaps(slot),
        }
    }
}

impl FromStr for OverlapRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge-touch" | "edge_touch" | "edgetouch" => Ok(OverlapRule::EdgeTouch),
            "half-open" | "half_open" | "halfopen" => Ok(OverlapRule::HalfOpen),
            other => Err(format!("unknown overlap rule: {other}")),
        }
    }
}

impl fmt::Display for OverlapRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapRule::EdgeTouch => f.write_str("edge-touch"),
            OverlapRule::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Per-staff busy spans built from one snapshot of fetched appointments.
///
/// Purely in-memory: the snapshot may be stale by the time a booking is
/// submitted, so this is a UI hint, not a conflict guarantee.
#[derive(Debug, Clone, Default)]
pub struct AppointmentOverlapIndex {
    rule: OverlapRule,
    /// Spans sorted by `start`.
    by_staff: HashMap<StaffId, Vec<(Span, AppointmentId)>>,
}

impl AppointmentOverlapIndex {
    pub fn new(appointments: &[Appointment], rule: OverlapRule) -> Self {
        let mut by_staff: HashMap<StaffId, Vec<(Span, AppointmentId)>> = HashMap::new();
        for appt in appointments {
            // The assignee holds the slot even before participants are attached.
            let staff = std::iter::once(appt.assignee)
                .chain(appt.participant_ids().filter(|id| *id != appt.assignee));
            for staff_id in staff {
                by_staff.entry(staff_id).or_default().push((appt.span, appt.id));
            }
        }
        for spans in by_staff.values_mut() {
            spans.sort_by_key(|(s, _)| s.start);
        }
        Self { rule, by_staff }
    }

    pub fn rule(&self) -> OverlapRule {
        self.rule
    }

    pub fn is_busy(&self, staff_id: &StaffId, slot_start: Ms, slot_end: Ms) -> bool {
        let slot = Span {
            start: slot_start,
            end: slot_end,
        };
        self.busy_with(staff_id, &slot).is_some()
    }

    /// The first appointment that makes `staff_id` busy during `slot`.
    pub fn busy_with(&self, staff_id: &StaffId, slot: &Span) -> Option<AppointmentId> {
        let spans = self.by_staff.get(staff_id)?;
        // Neither rule can match an appointment starting at or after slot.end.
        let right_bound = spans.partition_point(|(s, _)| s.start < slot.end.max(slot.start + 1));
        spans[..right_bound]
            .iter()
            .find(|(s, _)| self.rule.conflicts(s, slot))
            .map(|(_, id)| *id)
    }

    /// Number of snapshot appointments `staff_id` participates in.
    pub fn load(&self, staff_id: &StaffId) -> usize {
        self.by_staff.get(staff_id).map_or(0, Vec::len)
    }
}
