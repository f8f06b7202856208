use thiserror::Error;

use crate::backend::PersistenceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Malformed day or duration; rejected before any backend call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ScheduleError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ScheduleError::InvalidArgument(msg.into())
    }
}
