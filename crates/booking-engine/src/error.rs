//! Error types for booking-engine operations.

use thiserror::Error;

use crate::model::{SlotId, SlotStatus, UserId};

/// Failures raised by a storage adapter.
///
/// Constraint violations are distinct variants so that callers can tell a
/// rejected write apart from an infrastructure failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("slot overlaps an existing {status} slot of user {user_id}")]
    Overlap { user_id: UserId, status: SlotStatus },

    #[error("email already exists: {0}")]
    DuplicateEmail(String),

    #[error("slot {slot_id} was modified by a concurrent transaction")]
    StaleVersion { slot_id: SlotId },

    #[error("timed out waiting for the lock on slot {slot_id}")]
    LockTimeout { slot_id: SlotId },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("store state is poisoned")]
    Poisoned,
}

/// Error returned by every engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

/// Coarse classification of a [`BookingError`], used by front ends to pick a
/// response class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Internal,
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::InvalidInput(_) => ErrorKind::InvalidInput,
            BookingError::NotFound(_) => ErrorKind::NotFound,
            BookingError::Conflict(_) => ErrorKind::Conflict,
            BookingError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        BookingError::InvalidInput(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        BookingError::NotFound(msg.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        BookingError::Conflict(msg.into())
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Overlap { .. }
            | StoreError::DuplicateEmail(_)
            | StoreError::StaleVersion { .. }
            | StoreError::LockTimeout { .. } => BookingError::Conflict(err.to_string()),
            StoreError::NotFound(what) => BookingError::NotFound(format!("{what} not found")),
            StoreError::InvalidSnapshot(_) => BookingError::InvalidInput(err.to_string()),
            StoreError::Poisoned => BookingError::Storage(err),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violations_surface_as_conflicts() {
        let slot_id = SlotId::new();
        for err in [
            StoreError::DuplicateEmail("a@b.c".to_string()),
            StoreError::StaleVersion { slot_id },
            StoreError::LockTimeout { slot_id },
            StoreError::Overlap {
                user_id: UserId::new(),
                status: SlotStatus::Busy,
            },
        ] {
            assert_eq!(BookingError::from(err).kind(), ErrorKind::Conflict);
        }
    }

    #[test]
    fn invalid_snapshot_is_invalid_input() {
        let err = BookingError::from(StoreError::InvalidSnapshot("bad slot".to_string()));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn poisoned_store_is_internal() {
        let err = BookingError::from(StoreError::Poisoned);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "storage failure: store state is poisoned");
    }
}
