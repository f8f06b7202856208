use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub type BusinessId = Ulid;
pub type LocationId = Ulid;
pub type CustomerId = Ulid;
pub type StaffId = Ulid;
pub type AppointmentId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `[start, start + minutes)`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Staff role at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Closer,
    Setter,
    Installer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFlags {
    pub closer: bool,
    pub setter: bool,
    pub installer: bool,
}

impl RoleFlags {
    pub fn closer() -> Self {
        Self { closer: true, ..Self::default() }
    }

    pub fn setter() -> Self {
        Self { setter: true, ..Self::default() }
    }

    pub fn has(&self, role: Role) -> bool {
        match role {
            Role::Closer => self.closer,
            Role::Setter => self.setter,
            Role::Installer => self.installer,
        }
    }
}

/// A bookable person. Owned by the roster service; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: StaffId,
    pub display_name: String,
    pub roles: RoleFlags,
    pub avatar: Option<String>,
}

impl StaffMember {
    pub fn new(id: StaffId, display_name: impl Into<String>, roles: RoleFlags) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            roles,
            avatar: None,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.has(role)
    }
}

/// Location membership row. `self_only` restricts members holding `role`
/// to booking themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub location_id: LocationId,
    pub staff_id: StaffId,
    pub role: Role,
    pub self_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentKind {
    Meeting,
    TimeOff { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentParticipant {
    pub appointment_id: AppointmentId,
    pub staff_id: StaffId,
    pub business_id: BusinessId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub business_id: BusinessId,
    pub location_id: LocationId,
    /// Absent for non-customer events such as time off.
    pub customer_id: Option<CustomerId>,
    pub name: String,
    pub span: Span,
    pub kind: AppointmentKind,
    /// The staff member the slot was assigned to.
    pub assignee: StaffId,
    pub participants: Vec<AppointmentParticipant>,
    /// Client key of the booking attempt that created this appointment.
    pub idempotency_key: Ulid,
}

impl Appointment {
    pub fn duration_minutes(&self) -> Ms {
        self.span.duration_ms() / MINUTE_MS
    }

    pub fn has_participant(&self, staff_id: &StaffId) -> bool {
        self.participants.iter().any(|p| p.staff_id == *staff_id)
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = StaffId> + '_ {
        self.participants.iter().map(|p| p.staff_id)
    }
}

/// Write-side appointment fields. The id is assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub business_id: BusinessId,
    pub location_id: LocationId,
    pub customer_id: Option<CustomerId>,
    pub name: String,
    pub span: Span,
    pub kind: AppointmentKind,
    pub assignee: StaffId,
    /// Generated once per booking attempt; a resubmission reuses it.
    pub idempotency_key: Ulid,
}

impl NewAppointment {
    pub fn into_appointment(self, id: AppointmentId, staff_ids: &[StaffId]) -> Appointment {
        let participants = staff_ids
            .iter()
            .map(|&staff_id| AppointmentParticipant {
                appointment_id: id,
                staff_id,
                business_id: self.business_id,
            })
            .collect();
        Appointment {
            id,
            business_id: self.business_id,
            location_id: self.location_id,
            customer_id: self.customer_id,
            name: self.name,
            span: self.span,
            kind: self.kind,
            assignee: self.assignee,
            participants,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Candidate booking interval. Derived per query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Ms,
    pub step: Ms,
}

impl TimeSlot {
    pub fn end(&self) -> Ms {
        self.start + self.step
    }

    /// The interval an appointment of `duration_ms` would occupy in this slot.
    pub fn span_for(&self, duration_ms: Ms) -> Span {
        Span::new(self.start, self.start + duration_ms)
    }
}

/// Per-slot availability as shown to the user and used at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub slot: TimeSlot,
    pub bookable: bool,
    /// Eligible, free staff in assignment order.
    pub eligible: Vec<StaffId>,
    /// Who would be assigned if booked now.
    pub assignee: Option<StaffMember>,
}

/// One location's memberships and appointments, as held by the store.
#[derive(Debug, Clone)]
pub struct LocationState {
    pub id: LocationId,
    pub name: Option<String>,
    /// Roster order: the order memberships were granted.
    pub memberships: Vec<Membership>,
    /// Sorted by `span.start`.
    pub appointments: Vec<Appointment>,
}

impl LocationState {
    pub fn new(id: LocationId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            memberships: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `span.start`.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appointment.span.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: AppointmentId) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment_mut(&mut self, id: AppointmentId) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps `query` (half-open).
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    pub fn members_with_role(&self, role: Role) -> impl Iterator<Item = &Membership> {
        self.memberships.iter().filter(move |m| m.role == role)
    }
}

/// The durable record format: flat, one record per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated {
        id: LocationId,
        name: Option<String>,
    },
    StaffUpserted {
        member: StaffMember,
    },
    MembershipGranted {
        membership: Membership,
    },
    MembershipRevoked {
        location_id: LocationId,
        staff_id: StaffId,
        role: Role,
    },
    /// First half of the two-step write: the appointment without participants.
    AppointmentCreated {
        appointment: Appointment,
    },
    ParticipantsAttached {
        appointment_id: AppointmentId,
        location_id: LocationId,
        staff_ids: Vec<StaffId>,
    },
    /// Appointment and participants committed as one record.
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentDeleted {
        id: AppointmentId,
        location_id: LocationId,
    },
}

impl Event {
    /// The location an event applies to, if it is location-scoped.
    pub fn location_id(&self) -> Option<LocationId> {
        match self {
            Event::LocationCreated { id, .. } => Some(*id),
            Event::MembershipGranted { membership } => Some(membership.location_id),
            Event::MembershipRevoked { location_id, .. }
            | Event::ParticipantsAttached { location_id, .. }
            | Event::AppointmentDeleted { location_id, .. } => Some(*location_id),
            Event::AppointmentCreated { appointment, .. }
            | Event::AppointmentBooked { appointment, .. } => Some(appointment.location_id),
            Event::StaffUpserted { .. } => None,
        }
    }
}
