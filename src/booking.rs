use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::backend::{PersistenceError, SchedulingBackend};
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, ScheduleChange};
use crate::schedule::{AppointmentOverlapIndex, OverlapRule, ScheduleError, validate_duration};

/// How the appointment and its participant rows reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// One `book_appointment_atomic` call; the backend commits both or neither.
    #[default]
    Atomic,
    /// `create_appointment` then `attach_participants`, with a compensating
    /// delete when the second step fails.
    TwoStep,
}

impl CommitMode {
    fn label(&self) -> &'static str {
        match self {
            CommitMode::Atomic => "atomic",
            CommitMode::TwoStep => "two_step",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("staff {staff_id} is no longer free: conflicts with appointment {appointment_id}")]
    StaleAvailability {
        staff_id: StaffId,
        appointment_id: AppointmentId,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(
        "appointment {appointment_id} created but participants were not attached ({}): {message}",
        rollback_label(.rolled_back)
    )]
    PartialBookingFailure {
        appointment_id: AppointmentId,
        /// The compensating delete succeeded; nothing is left behind.
        rolled_back: bool,
        message: String,
    },
}

fn rollback_label(rolled_back: &bool) -> &'static str {
    if *rolled_back { "rolled back" } else { "orphaned" }
}

impl BookingError {
    fn label(&self) -> &'static str {
        match self {
            BookingError::InvalidArgument(_) => "invalid_argument",
            BookingError::StaleAvailability { .. } => "stale_availability",
            BookingError::Persistence(_) => "persistence",
            BookingError::PartialBookingFailure { .. } => "partial_failure",
        }
    }
}

impl From<ScheduleError> for BookingError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidArgument(msg) => BookingError::InvalidArgument(msg),
            ScheduleError::Persistence(e) => BookingError::Persistence(e),
        }
    }
}

/// A user's slot selection, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub business_id: BusinessId,
    pub location_id: LocationId,
    pub customer_id: Option<CustomerId>,
    pub name: String,
    pub kind: AppointmentKind,
    pub start: Ms,
    pub duration_minutes: u32,
    /// The staff member the slot was assigned to.
    pub assignee: StaffId,
    /// The user making the booking; always attached as a participant.
    pub acting_user: StaffId,
    pub extra_participants: Vec<StaffId>,
    /// Clone the request to resubmit the same attempt; call
    /// [`BookingRequest::new_attempt`] for a fresh one.
    pub idempotency_key: Ulid,
}

impl BookingRequest {
    pub fn new(
        business_id: BusinessId,
        location_id: LocationId,
        assignee: StaffId,
        acting_user: StaffId,
        start: Ms,
        duration_minutes: u32,
    ) -> Self {
        Self {
            business_id,
            location_id,
            customer_id: None,
            name: "Appointment".into(),
            kind: AppointmentKind::Meeting,
            start,
            duration_minutes,
            assignee,
            acting_user,
            extra_participants: Vec::new(),
            idempotency_key: Ulid::new(),
        }
    }

    pub fn with_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_kind(mut self, kind: AppointmentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_participant(mut self, staff_id: StaffId) -> Self {
        self.extra_participants.push(staff_id);
        self
    }

    /// Same selection under a new idempotency key.
    pub fn new_attempt(&self) -> Self {
        Self {
            idempotency_key: Ulid::new(),
            ..self.clone()
        }
    }

    /// Assignee first, then the acting user, then extras; each at most once.
    pub fn participants(&self) -> Vec<StaffId> {
        let mut ids = Vec::with_capacity(2 + self.extra_participants.len());
        for id in [self.assignee, self.acting_user]
            .into_iter()
            .chain(self.extra_participants.iter().copied())
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn validate(&self) -> Result<Span, BookingError> {
        let duration_ms = validate_duration(self.duration_minutes)?;
        if self.start < MIN_VALID_TIMESTAMP_MS || self.start + duration_ms > MAX_VALID_TIMESTAMP_MS {
            return Err(BookingError::InvalidArgument("start out of range".into()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(BookingError::InvalidArgument("appointment name too long".into()));
        }
        if self.participants().len() > MAX_PARTICIPANTS_PER_APPOINTMENT {
            return Err(BookingError::InvalidArgument("too many participants".into()));
        }
        Ok(Span::new(self.start, self.start + duration_ms))
    }

    fn fields(&self, span: Span) -> NewAppointment {
        NewAppointment {
            business_id: self.business_id,
            location_id: self.location_id,
            customer_id: self.customer_id,
            name: self.name.clone(),
            span,
            kind: self.kind.clone(),
            assignee: self.assignee,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// What the confirmation step receives after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    pub appointment_id: AppointmentId,
    pub location_id: LocationId,
    pub customer_id: Option<CustomerId>,
    pub span: Span,
    pub participants: Vec<StaffId>,
    /// The attempt had already committed; nothing new was written.
    pub replayed: bool,
}

/// What an earlier submission under the same idempotency key left behind.
#[derive(Debug, PartialEq, Eq)]
enum PriorAttempt {
    None,
    Committed(AppointmentId),
    /// The appointment exists but some participant rows never landed.
    Incomplete {
        appointment_id: AppointmentId,
        missing: Vec<StaffId>,
    },
}

/// Commits a slot selection as an appointment plus participant rows.
///
/// No retries: every failure goes back to the caller, and a new attempt
/// starts from a fresh availability snapshot.
pub struct AppointmentBookingTransaction<B: ?Sized> {
    backend: Arc<B>,
    refresh: Option<Arc<NotifyHub>>,
    mode: CommitMode,
    rule: OverlapRule,
}

impl<B: SchedulingBackend + ?Sized> AppointmentBookingTransaction<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            refresh: None,
            mode: CommitMode::default(),
            rule: OverlapRule::default(),
        }
    }

    pub fn with_refresh(mut self, hub: Arc<NotifyHub>) -> Self {
        self.refresh = Some(hub);
        self
    }

    pub fn with_mode(mut self, mode: CommitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_overlap_rule(mut self, rule: OverlapRule) -> Self {
        self.rule = rule;
        self
    }

    pub async fn commit(&self, request: &BookingRequest) -> Result<BookingReceipt, BookingError> {
        let started = Instant::now();
        let result = self.commit_inner(request).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(
            crate::observability::BOOKINGS_TOTAL,
            "mode" => self.mode.label(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(crate::observability::BOOKING_DURATION_SECONDS, "mode" => self.mode.label())
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn commit_inner(&self, request: &BookingRequest) -> Result<BookingReceipt, BookingError> {
        let span = request.validate()?;
        let participants = request.participants();

        let appointment_id = match self.recheck(request, &span).await? {
            PriorAttempt::Committed(existing) => {
                info!(appointment = %existing, key = %request.idempotency_key, "booking already committed");
                return Ok(BookingReceipt {
                    appointment_id: existing,
                    location_id: request.location_id,
                    customer_id: request.customer_id,
                    span,
                    participants,
                    replayed: true,
                });
            }
            PriorAttempt::Incomplete { appointment_id, missing } => {
                info!(
                    appointment = %appointment_id,
                    key = %request.idempotency_key,
                    missing = missing.len(),
                    "finishing half-written booking"
                );
                self.attach_or_compensate(appointment_id, &missing).await?;
                appointment_id
            }
            PriorAttempt::None => self.write_new(request, span, &participants).await?,
        };

        info!(
            appointment = %appointment_id,
            location = %request.location_id,
            assignee = %request.assignee,
            start = span.start,
            end = span.end,
            "appointment booked"
        );
        if let Some(hub) = &self.refresh {
            hub.send(ScheduleChange::Booked {
                location_id: request.location_id,
                appointment_id,
                customer_id: request.customer_id,
                span,
                participants: participants.clone(),
            });
        }

        Ok(BookingReceipt {
            appointment_id,
            location_id: request.location_id,
            customer_id: request.customer_id,
            span,
            participants,
            replayed: false,
        })
    }

    async fn write_new(
        &self,
        request: &BookingRequest,
        span: Span,
        participants: &[StaffId],
    ) -> Result<AppointmentId, BookingError> {
        let fields = request.fields(span);
        match self.mode {
            CommitMode::Atomic => Ok(self
                .backend
                .book_appointment_atomic(&fields, participants)
                .await?),
            CommitMode::TwoStep => self.commit_two_step(&fields, participants).await,
        }
    }

    /// Fresh look at the assignee's calendar just before writing, and at
    /// whatever an earlier submission of this attempt left behind.
    async fn recheck(&self, request: &BookingRequest, span: &Span) -> Result<PriorAttempt, BookingError> {
        // One ms earlier so an appointment ending exactly at `start` is seen.
        let window = Span::new(span.start - 1, span.end);
        let snapshot = self
            .backend
            .list_appointments(request.location_id, window)
            .await?;

        let (ours, others): (Vec<Appointment>, Vec<Appointment>) = snapshot
            .into_iter()
            .partition(|a| a.idempotency_key == request.idempotency_key);

        if let Some(existing) = ours.first() {
            let missing: Vec<StaffId> = request
                .participants()
                .into_iter()
                .filter(|id| !existing.has_participant(id))
                .collect();
            return Ok(if missing.is_empty() {
                PriorAttempt::Committed(existing.id)
            } else {
                PriorAttempt::Incomplete {
                    appointment_id: existing.id,
                    missing,
                }
            });
        }

        // The configured rule decides what the grid showed; a true overlap
        // is refused here too since the store would refuse it anyway.
        let shown = AppointmentOverlapIndex::new(&others, self.rule);
        let overlapping = AppointmentOverlapIndex::new(&others, OverlapRule::HalfOpen);
        if let Some(appointment_id) = shown
            .busy_with(&request.assignee, span)
            .or_else(|| overlapping.busy_with(&request.assignee, span))
        {
            return Err(BookingError::StaleAvailability {
                staff_id: request.assignee,
                appointment_id,
            });
        }
        Ok(PriorAttempt::None)
    }

    async fn commit_two_step(
        &self,
        fields: &NewAppointment,
        participants: &[StaffId],
    ) -> Result<AppointmentId, BookingError> {
        let appointment_id = self.backend.create_appointment(fields).await?;
        self.attach_or_compensate(appointment_id, participants).await?;
        Ok(appointment_id)
    }

    /// Attach `participants`; on failure delete the appointment so no
    /// half-written booking is left, and report what happened.
    async fn attach_or_compensate(
        &self,
        appointment_id: AppointmentId,
        participants: &[StaffId],
    ) -> Result<(), BookingError> {
        let Err(attach_err) = self
            .backend
            .attach_participants(appointment_id, participants)
            .await
        else {
            return Ok(());
        };

        warn!(appointment = %appointment_id, "attaching participants failed: {attach_err}");
        metrics::counter!(crate::observability::PARTIAL_BOOKINGS_TOTAL).increment(1);

        let rolled_back = match self.backend.delete_appointment(appointment_id).await {
            Ok(()) => {
                info!(appointment = %appointment_id, "compensating delete succeeded");
                true
            }
            Err(e) => {
                error!(appointment = %appointment_id, "compensating delete failed, appointment orphaned: {e}");
                false
            }
        };
        metrics::counter!(
            crate::observability::COMPENSATIONS_TOTAL,
            "outcome" => rollback_label(&rolled_back)
        )
        .increment(1);

        Err(BookingError::PartialBookingFailure {
            appointment_id,
            rolled_back,
            message: attach_err.message,
        })
    }

    /// Explicit cancellation; participant rows go with the appointment.
    pub async fn cancel(
        &self,
        location_id: LocationId,
        appointment_id: AppointmentId,
    ) -> Result<(), BookingError> {
        self.backend.delete_appointment(appointment_id).await?;
        info!(appointment = %appointment_id, location = %location_id, "appointment cancelled");
        if let Some(hub) = &self.refresh {
            hub.send(ScheduleChange::Cancelled {
                location_id,
                appointment_id,
            });
        }
        Ok(())
    }
}
