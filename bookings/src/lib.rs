//! # tripcarry bookings
//!
//! Booking lifecycle manager for the traveler/sender luggage marketplace.
//!
//! A booking pairs a traveler's trip with a sender's package request and
//! moves through two independent state machines: delivery status and payment
//! status. [`BookingStore`] is the single owner of the client-side booking
//! collection. UI surfaces share clones of it, read filtered
//! [`BookingSnapshot`]s, subscribe to changes and issue commands.
//!
//! Every command is validated synchronously, applied optimistically, sent to
//! the remote [`BookingService`], then reconciled with the server's values or
//! rolled back:
//!
//! ```text
//! UI ──command──► validate ──► optimistic change ──► notify
//!                    │                                  │
//!                 reject                           remote call
//!                                                       │
//!                                 reconcile (server wins) / roll back ──► notify
//! ```
//!
//! Only one change per booking may be in flight; a second one is rejected
//! with [`BookingError::Conflict`] instead of being queued.
//!
//! ## Example
//!
//! ```ignore
//! use tripcarry_bookings::{BookingStatus, BookingStore, PackageDetails};
//!
//! let booking = store
//!     .request_booking("T1", "S1", PackageDetails::new("small", "books"))
//!     .await?
//!     .settled()
//!     .await?;
//!
//! let key = booking.key.clone();
//! store.transition_status(key, BookingStatus::Confirmed).await?.settled().await?;
//! ```

pub mod actions;
pub mod config;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod mocks;
pub mod reducer;
pub mod service;
pub mod settlement;
pub mod store;
pub mod subscription;
pub mod types;

pub use actions::BookingAction;
pub use config::BookingConfig;
pub use environment::BookingEnvironment;
pub use error::BookingError;
pub use lifecycle::{BookingStatus, PaymentStatus, TransitionError};
pub use reducer::BookingReducer;
pub use service::{BookingService, ServiceError, ServiceResult, TimeoutBookingService};
pub use settlement::{Settled, Settlement, SettlementRegistry};
pub use store::BookingStore;
pub use subscription::{Subscription, SubscriptionHandle};
pub use types::{
    Booking, BookingFilter, BookingId, BookingKey, BookingSnapshot, BookingState, CommandId,
    LocalId, PackageDetails, ParticipantId, RemoteBooking, Role, TripId,
};
