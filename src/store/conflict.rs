use crate::limits::*;
use crate::model::*;

use super::StoreError;

pub(crate) fn validate_span(span: &Span) -> Result<(), StoreError> {
    if span.start >= span.end {
        return Err(StoreError::Invalid("appointment must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(StoreError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > Ms::from(MAX_APPOINTMENT_MINUTES) * MINUTE_MS {
        return Err(StoreError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

pub(crate) fn validate_fields(fields: &NewAppointment, business_id: BusinessId) -> Result<(), StoreError> {
    validate_span(&fields.span)?;
    if fields.business_id != business_id {
        return Err(StoreError::Invalid("appointment belongs to another business"));
    }
    if fields.name.len() > MAX_NAME_LEN {
        return Err(StoreError::LimitExceeded("appointment name too long"));
    }
    Ok(())
}

/// Exclusion constraint: one assignee, no two half-open-overlapping
/// appointments at the same location.
pub(crate) fn check_assignee_free(
    ls: &LocationState,
    assignee: &StaffId,
    span: &Span,
) -> Result<(), StoreError> {
    match ls.overlapping(span).find(|a| a.assignee == *assignee) {
        Some(existing) => Err(StoreError::Conflict {
            staff_id: *assignee,
            appointment_id: existing.id,
        }),
        None => Ok(()),
    }
}

/// Whether `staff_id` takes part in anything overlapping `span`, as
/// assignee or participant.
pub(crate) fn staff_is_free(ls: &LocationState, staff_id: &StaffId, span: &Span) -> bool {
    !ls.overlapping(span)
        .any(|a| a.assignee == *staff_id || a.has_participant(staff_id))
}
