//! Booking lifecycle state machines.
//!
//! Two small, independent machines:
//!
//! ```text
//! status:          pending ──► confirmed ──► completed
//!                     │            │
//!                     └──► cancelled ◄┘
//!
//! payment status:  pending ──► paid ──► refunded
//!                              ▲
//!                              └── only while status is confirmed or completed
//! ```
//!
//! The only cross-axis rule is the entry guard on `paid`. Everything here is a
//! pure function of the current values, so it can be exercised without a
//! store or a remote service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Delivery progress of a booking, driven by the two counterparts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Requested by the sender, awaiting the traveler
    Pending,
    /// Accepted by the traveler
    Confirmed,
    /// Declined or withdrawn (terminal)
    Cancelled,
    /// Package delivered (terminal)
    Completed,
}

impl BookingStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Confirmed,
        Self::Cancelled,
        Self::Completed,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Whether `target` is a direct edge from `self`
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Confirmed | Self::Cancelled)
                | (Self::Confirmed, Self::Completed | Self::Cancelled)
        )
    }

    /// No further status transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Counts against the one-booking-per-pairing rule
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Whether a payment may be recorded in this status
    #[must_use]
    pub const fn accepts_payment(self) -> bool {
        matches!(self, Self::Confirmed | Self::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus {
                axis: Axis::Status,
                value: s.to_string(),
            })
    }
}

/// Payment progress of a booking, driven by the payer and the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Nothing paid yet
    Pending,
    /// Paid in full
    Paid,
    /// Payment returned to the payer (terminal)
    Refunded,
}

impl PaymentStatus {
    /// All payment statuses, in lifecycle order
    pub const ALL: [Self; 3] = [Self::Pending, Self::Paid, Self::Refunded];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }

    /// Whether `target` is a direct edge from `self`
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Paid) | (Self::Paid, Self::Refunded)
        )
    }

    /// No further payment transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus {
                axis: Axis::Payment,
                value: s.to_string(),
            })
    }
}

/// Which of the two machines a transition belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Delivery status
    Status,
    /// Payment status
    Payment,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("status"),
            Self::Payment => f.write_str("payment status"),
        }
    }
}

/// A status string that names no known state
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("unknown {axis} `{value}`")]
pub struct UnknownStatus {
    /// Axis the string was parsed for
    pub axis: Axis,
    /// The rejected input
    pub value: String,
}

/// A transition the state machine does not allow
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransitionError {
    /// No edge between the two states
    #[error("cannot move {axis} from {from} to {to}")]
    NoEdge {
        /// Axis of the attempted transition
        axis: Axis,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Payment cannot be recorded before the traveler confirmed
    #[error("cannot mark payment {to} while booking is {status}")]
    PaymentNotAllowed {
        /// Current booking status
        status: BookingStatus,
        /// Requested payment status
        to: PaymentStatus,
    },
}

/// Validate a status transition
///
/// # Errors
///
/// Returns [`TransitionError::NoEdge`] unless `current → target` is one of
/// the edges in the module diagram.
pub fn next_status(
    current: BookingStatus,
    target: BookingStatus,
) -> Result<BookingStatus, TransitionError> {
    if current.can_transition_to(target) {
        Ok(target)
    } else {
        Err(TransitionError::NoEdge {
            axis: Axis::Status,
            from: current.to_string(),
            to: target.to_string(),
        })
    }
}

/// Validate a payment status transition
///
/// # Errors
///
/// - [`TransitionError::NoEdge`] unless `current → target` is `pending → paid`
///   or `paid → refunded`
/// - [`TransitionError::PaymentNotAllowed`] when moving to `paid` while the
///   booking is neither confirmed nor completed
pub fn next_payment_status(
    status: BookingStatus,
    current: PaymentStatus,
    target: PaymentStatus,
) -> Result<PaymentStatus, TransitionError> {
    if !current.can_transition_to(target) {
        return Err(TransitionError::NoEdge {
            axis: Axis::Payment,
            from: current.to_string(),
            to: target.to_string(),
        });
    }

    if target == PaymentStatus::Paid && !status.accepts_payment() {
        return Err(TransitionError::PaymentNotAllowed { status, to: target });
    }

    Ok(target)
}
