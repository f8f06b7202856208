use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// Whether the acting user may book anyone at this location or only
/// themself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingScope {
    SelfOnly,
    #[default]
    Open,
}

/// Order in which free staff are offered for a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StaffOrdering {
    /// Roster fetch order.
    #[default]
    Roster,
    /// Backend-ranked staff member first (when free), then roster order.
    Priority(Option<StaffId>),
}

pub struct EligibleStaffResolver<'a> {
    roster: &'a [StaffMember],
    role: Role,
    acting_user: &'a StaffMember,
    scope: BookingScope,
}

impl<'a> EligibleStaffResolver<'a> {
    pub fn new(
        roster: &'a [StaffMember],
        role: Role,
        acting_user: &'a StaffMember,
        scope: BookingScope,
    ) -> Self {
        Self {
            roster,
            role,
            acting_user,
            scope,
        }
    }

    pub fn scope(&self) -> BookingScope {
        self.scope
    }

    /// Free, eligible staff in assignment order. The first entry is the
    /// default assignee.
    pub fn resolve(
        &self,
        ordering: StaffOrdering,
        is_busy: impl Fn(&StaffId) -> bool,
    ) -> Vec<&'a StaffMember> {
        match self.scope {
            BookingScope::SelfOnly => {
                if is_busy(&self.acting_user.id) {
                    Vec::new()
                } else {
                    vec![self.acting_user]
                }
            }
            BookingScope::Open => {
                let mut seen = HashSet::new();
                let mut eligible: Vec<&'a StaffMember> = self
                    .roster
                    .iter()
                    .filter(|m| m.has_role(self.role))
                    .filter(|m| seen.insert(m.id))
                    .filter(|m| !is_busy(&m.id))
                    .collect();
                if let StaffOrdering::Priority(Some(ranked)) = ordering
                    && let Some(pos) = eligible.iter().position(|m| m.id == ranked)
                {
                    let member = eligible.remove(pos);
                    eligible.insert(0, member);
                }
                eligible
            }
        }
    }
}
