//! Inputs to the booking reducer.
//!
//! Commands come from UI surfaces through [`crate::BookingStore`]; feedback
//! actions are produced by the remote-call effects and carry the
//! [`CommandId`] of the command they settle.

use crate::lifecycle::{BookingStatus, PaymentStatus};
use crate::service::ServiceError;
use crate::types::{
    BookingKey, CommandId, LocalId, PackageDetails, ParticipantId, RemoteBooking, Role, TripId,
};

/// Everything the booking reducer reacts to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    // ========== Commands ==========
    /// Sender books capacity on a trip
    RequestBooking {
        /// Correlation id
        command_id: CommandId,
        /// Key of the draft until the server assigns an id
        local_id: LocalId,
        /// Trip being booked
        trip_id: TripId,
        /// Sender / package request
        counterpart_id: ParticipantId,
        /// Package being carried
        details: PackageDetails,
    },

    /// Either counterpart moves the delivery status
    TransitionStatus {
        /// Correlation id
        command_id: CommandId,
        /// Target booking (a confirmed draft key still works)
        key: BookingKey,
        /// Requested status
        target: BookingStatus,
    },

    /// Payer or platform moves the payment status
    TransitionPaymentStatus {
        /// Correlation id
        command_id: CommandId,
        /// Target booking
        key: BookingKey,
        /// Requested payment status
        target: PaymentStatus,
    },

    /// Hydrate the collection with the bookings a role can see
    LoadForRole {
        /// Correlation id
        command_id: CommandId,
        /// Whose bookings
        role: Role,
    },

    // ========== Feedback ==========
    /// The server created the draft
    CreateSettled {
        /// Command being settled
        command_id: CommandId,
        /// Draft that was created
        local_id: LocalId,
        /// Authoritative record
        record: RemoteBooking,
    },

    /// The server applied a status change
    StatusSettled {
        /// Command being settled
        command_id: CommandId,
        /// Booking that changed
        key: BookingKey,
        /// Authoritative record
        record: RemoteBooking,
    },

    /// The server applied a payment status change
    PaymentSettled {
        /// Command being settled
        command_id: CommandId,
        /// Booking that changed
        key: BookingKey,
        /// Authoritative record
        record: RemoteBooking,
    },

    /// A create or transition call failed; roll back
    RemoteFailed {
        /// Command being settled
        command_id: CommandId,
        /// Booking to roll back
        key: BookingKey,
        /// What went wrong
        error: ServiceError,
    },

    /// The role's bookings arrived
    RoleLoaded {
        /// Command being settled
        command_id: CommandId,
        /// Whose bookings
        role: Role,
        /// Records visible to the role
        records: Vec<RemoteBooking>,
    },

    /// The role listing failed (nothing to roll back)
    LoadFailed {
        /// Command being settled
        command_id: CommandId,
        /// Whose bookings
        role: Role,
        /// What went wrong
        error: ServiceError,
    },
}

impl BookingAction {
    /// Correlation id of the command this action starts or settles
    #[must_use]
    pub const fn command_id(&self) -> CommandId {
        match self {
            Self::RequestBooking { command_id, .. }
            | Self::TransitionStatus { command_id, .. }
            | Self::TransitionPaymentStatus { command_id, .. }
            | Self::LoadForRole { command_id, .. }
            | Self::CreateSettled { command_id, .. }
            | Self::StatusSettled { command_id, .. }
            | Self::PaymentSettled { command_id, .. }
            | Self::RemoteFailed { command_id, .. }
            | Self::RoleLoaded { command_id, .. }
            | Self::LoadFailed { command_id, .. } => *command_id,
        }
    }

    /// Whether this action was produced by a remote call
    #[must_use]
    pub const fn is_feedback(&self) -> bool {
        !matches!(
            self,
            Self::RequestBooking { .. }
                | Self::TransitionStatus { .. }
                | Self::TransitionPaymentStatus { .. }
                | Self::LoadForRole { .. }
        )
    }

    /// Short name for logs and metric labels
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestBooking { .. } => "request_booking",
            Self::TransitionStatus { .. } => "transition_status",
            Self::TransitionPaymentStatus { .. } => "transition_payment_status",
            Self::LoadForRole { .. } => "load_for_role",
            Self::CreateSettled { .. } => "create_settled",
            Self::StatusSettled { .. } => "status_settled",
            Self::PaymentSettled { .. } => "payment_settled",
            Self::RemoteFailed { .. } => "remote_failed",
            Self::RoleLoaded { .. } => "role_loaded",
            Self::LoadFailed { .. } => "load_failed",
        }
    }
}
