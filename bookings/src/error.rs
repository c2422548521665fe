//! Error taxonomy surfaced to UI surfaces.

use crate::lifecycle::{TransitionError, UnknownStatus};
use crate::service::ServiceError;
use crate::types::{BookingKey, ParticipantId, TripId};
use std::time::Duration;
use thiserror::Error;

/// Why a booking command failed
///
/// Everything except [`BookingError::RemoteFailure`] and the timeout
/// variants is detected before any optimistic change is applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed command payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// State machine violation
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// The (trip, counterpart) pairing already has an active booking
    #[error("trip {trip_id} already has an active booking {existing} for {counterpart_id}")]
    DuplicateBooking {
        /// Trip of the rejected request
        trip_id: TripId,
        /// Counterpart of the rejected request
        counterpart_id: ParticipantId,
        /// The booking occupying the pairing
        existing: BookingKey,
    },

    /// A mutation on the same booking is still in flight; retry once it settles
    #[error("booking {0} has an operation in flight")]
    Conflict(BookingKey),

    /// Unknown booking identifier
    #[error("booking {0} not found")]
    NotFound(BookingKey),

    /// The remote call failed; the optimistic change has been rolled back
    #[error("remote booking service failed: {0}")]
    RemoteFailure(#[source] ServiceError),

    /// The caller stopped waiting; the booking is still settling
    #[error("no settlement within {0:?}")]
    SettlementTimeout(Duration),

    /// The store no longer accepts commands
    #[error("booking store is shut down")]
    ShutDown,

    /// Shutdown gave up waiting for in-flight remote calls
    #[error("shutdown timed out with {0} remote calls in flight")]
    ShutdownTimeout(usize),
}

impl BookingError {
    /// Whether the same command may succeed if retried later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::RemoteFailure(_) | Self::SettlementTimeout(_)
        )
    }

    /// Whether an optimistic change was applied and then rolled back
    #[must_use]
    pub const fn rolled_back(&self) -> bool {
        matches!(self, Self::RemoteFailure(_))
    }
}

impl From<UnknownStatus> for BookingError {
    fn from(error: UnknownStatus) -> Self {
        Self::InvalidInput(error.to_string())
    }
}
