use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Malformed input, rejected before anything is persisted.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("one or more services not found: {}", join_ids(.0))]
    InvalidServices(Vec<Ulid>),
    #[error("staff member not found or inactive: {0}")]
    InvalidStaff(Ulid),
    #[error("time slot conflicts with existing booking #{booking_number}")]
    Conflict { booking_number: String },
    #[error("cannot modify {0} booking")]
    Locked(BookingStatus),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("booking is already cancelled")]
    AlreadyCancelled,
    #[error("cannot cancel {0} booking")]
    CannotCancel(BookingStatus),
    /// Also returned for ids that exist under another tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BookingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "VALIDATION_ERROR",
            BookingError::InvalidServices(_) => "INVALID_SERVICES",
            BookingError::InvalidStaff(_) => "INVALID_STAFF",
            BookingError::Conflict { .. } => "BOOKING_CONFLICT",
            BookingError::Locked(_) => "BOOKING_LOCKED",
            BookingError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BookingError::AlreadyCancelled => "ALREADY_CANCELLED",
            BookingError::CannotCancel(_) => "CANNOT_CANCEL",
            BookingError::NotFound { .. } => "NOT_FOUND",
            BookingError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            BookingError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// User-input problems. These are not logged.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BookingError::Validation(_)
                | BookingError::InvalidServices(_)
                | BookingError::InvalidStaff(_)
                | BookingError::LimitExceeded(_)
        )
    }
}

fn join_ids(ids: &[Ulid]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_booking_number() {
        let err = BookingError::Conflict {
            booking_number: "BK20240315-AB12".into(),
        };
        assert_eq!(err.code(), "BOOKING_CONFLICT");
        assert_eq!(
            err.to_string(),
            "time slot conflicts with existing booking #BK20240315-AB12"
        );
    }

    #[test]
    fn validation_classification() {
        assert!(BookingError::InvalidServices(vec![]).is_validation());
        assert!(!BookingError::AlreadyCancelled.is_validation());
        assert!(!BookingError::not_found("booking", Ulid::nil()).is_validation());
    }

    #[test]
    fn locked_message() {
        let err = BookingError::Locked(BookingStatus::Completed);
        assert_eq!(err.to_string(), "cannot modify COMPLETED booking");
        assert_eq!(err.code(), "BOOKING_LOCKED");
    }
}
