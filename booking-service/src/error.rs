use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors surfaced by the inventory manager's entry points.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("booking {booking_id} does not belong to user {user_id}")]
    Authorization { booking_id: Uuid, user_id: String },

    /// Contention on the event; the caller may retry.
    #[error("{operation} on event {event_id} could not proceed: {reason}")]
    Conflict {
        operation: &'static str,
        event_id: Uuid,
        reason: String,
    },

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl BookingError {
    pub fn event_not_found(id: Uuid) -> Self {
        BookingError::NotFound { entity: "event", id }
    }

    pub fn booking_not_found(id: Uuid) -> Self {
        BookingError::NotFound {
            entity: "booking",
            id,
        }
    }

    /// Classifies a store failure: lock timeouts and serialization failures
    /// become conflicts, everything else a persistence error.
    pub fn from_store(operation: &'static str, event_id: Uuid, err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout(_) | StoreError::Serialization(_) => BookingError::Conflict {
                operation,
                event_id,
                reason: err.to_string(),
            },
            source => BookingError::Persistence { operation, source },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Conflict { .. } => true,
            BookingError::Persistence { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Errors caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, BookingError::Persistence { .. })
    }
}
