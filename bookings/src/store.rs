//! `BookingStore`: the handle UI surfaces share.
//!
//! Wraps the generic runtime store with typed commands, read-only snapshots
//! and settlement tracking. Cloning is cheap and every clone sees the same
//! collection.

use crate::actions::BookingAction;
use crate::config::BookingConfig;
use crate::environment::BookingEnvironment;
use crate::error::BookingError;
use crate::lifecycle::{BookingStatus, PaymentStatus};
use crate::reducer::BookingReducer;
use crate::service::{BookingService, TimeoutBookingService};
use crate::settlement::{self, Settled, Settlement, SettlementRegistry};
use crate::subscription::{Subscription, SubscriptionHandle};
use crate::types::{
    Booking, BookingFilter, BookingKey, BookingSnapshot, BookingState, CommandId, LocalId,
    PackageDetails, ParticipantId, Role, TripId,
};
use std::sync::Arc;
use std::time::Duration;
use tripcarry_runtime::{Notification, Store, StoreConfig, StoreError};

/// The runtime store specialised for bookings
type Runtime = Store<BookingState, BookingAction, BookingEnvironment, BookingReducer>;

/// A state change as published by the runtime
pub(crate) type BookingNotification = Notification<BookingState, BookingAction>;

/// Booking lifecycle manager shared by every UI surface
///
/// # Example
///
/// ```ignore
/// let store = BookingStore::new(BookingEnvironment::live(service));
///
/// let booking = store
///     .request_booking("T1", "sender@example.com", PackageDetails::new("small", "books"))
///     .await?            // rejected before anything changed
///     .settled()
///     .await?;           // rolled back if the server failed
/// ```
#[derive(Clone)]
pub struct BookingStore {
    runtime: Runtime,
    settlements: SettlementRegistry,
}

impl BookingStore {
    /// Creates a store with default runtime settings
    #[must_use]
    pub fn new(environment: BookingEnvironment) -> Self {
        Self::with_config(environment, StoreConfig::default())
    }

    /// Creates a store with custom runtime settings
    #[must_use]
    pub fn with_config(environment: BookingEnvironment, config: StoreConfig) -> Self {
        let settlements = environment.settlements.clone();
        Self {
            runtime: Store::with_config(BookingState::new(), BookingReducer::new(), environment, config),
            settlements,
        }
    }

    /// Creates a store from loaded configuration
    ///
    /// Applies the configured remote deadline around `service`.
    #[must_use]
    pub fn from_config(config: &BookingConfig, service: Arc<dyn BookingService>) -> Self {
        let service: Arc<dyn BookingService> = match config.remote_timeout {
            Some(timeout) => Arc::new(TimeoutBookingService::new(service, timeout)),
            None => service,
        };
        Self::with_config(BookingEnvironment::live(service), config.store_config())
    }

    // ========== Commands ==========

    /// Book capacity on a trip for a sender's package
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidInput`] if the trip, counterpart or size is blank
    /// - [`BookingError::DuplicateBooking`] if the pairing already has an active booking
    /// - [`BookingError::ShutDown`] if the store is shutting down
    pub async fn request_booking(
        &self,
        trip_id: impl Into<TripId>,
        counterpart_id: impl Into<ParticipantId>,
        details: PackageDetails,
    ) -> Result<Settlement<Booking>, BookingError> {
        let local_id = LocalId::new();
        let action = BookingAction::RequestBooking {
            command_id: CommandId::new(),
            local_id,
            trip_id: trip_id.into(),
            counterpart_id: counterpart_id.into(),
            details,
        };
        self.command(action, Some(BookingKey::Draft(local_id)), settlement::booking)
            .await
    }

    /// Move a booking's delivery status
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown key
    /// - [`BookingError::Conflict`] while another change on the booking is in flight
    /// - [`BookingError::InvalidTransition`] if the edge does not exist
    /// - [`BookingError::ShutDown`] if the store is shutting down
    pub async fn transition_status(
        &self,
        key: impl Into<BookingKey>,
        target: BookingStatus,
    ) -> Result<Settlement<Booking>, BookingError> {
        let key = key.into();
        let action = BookingAction::TransitionStatus {
            command_id: CommandId::new(),
            key: key.clone(),
            target,
        };
        self.command(action, Some(key), settlement::booking).await
    }

    /// Move a booking's payment status
    ///
    /// # Errors
    ///
    /// As [`transition_status`](Self::transition_status); moving to `paid`
    /// also requires the booking to be confirmed or completed.
    pub async fn transition_payment_status(
        &self,
        key: impl Into<BookingKey>,
        target: PaymentStatus,
    ) -> Result<Settlement<Booking>, BookingError> {
        let key = key.into();
        let action = BookingAction::TransitionPaymentStatus {
            command_id: CommandId::new(),
            key: key.clone(),
            target,
        };
        self.command(action, Some(key), settlement::booking).await
    }

    /// Fetch the bookings visible to a role and merge them in
    ///
    /// Bookings with a change in flight keep their local state. Settles with
    /// the role's filtered snapshot.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidInput`] for a blank participant id
    /// - [`BookingError::ShutDown`] if the store is shutting down
    pub async fn load_for_role(&self, role: Role) -> Result<Settlement<BookingSnapshot>, BookingError> {
        let action = BookingAction::LoadForRole {
            command_id: CommandId::new(),
            role,
        };
        self.command(action, None, settlement::snapshot).await
    }

    async fn command<T>(
        &self,
        action: BookingAction,
        key: Option<BookingKey>,
        extract: fn(Settled) -> Result<T, BookingError>,
    ) -> Result<Settlement<T>, BookingError> {
        let command_id = action.command_id();
        let name = action.name();
        // Register first so the feedback cannot settle before anyone listens
        let receiver = self.settlements.register(command_id);

        match self.runtime.send(action).await {
            Ok(_handle) => {
                tracing::debug!(%command_id, command = name, "Command accepted");
                Ok(Settlement::new(command_id, key, receiver, extract))
            },
            Err(error) => {
                self.settlements.forget(command_id);
                match error {
                    StoreError::Rejected(error) => {
                        tracing::debug!(%command_id, command = name, %error, "Command rejected");
                        metrics::counter!("bookings.commands.rejected", "command" => name)
                            .increment(1);
                        Err(error)
                    },
                    StoreError::ShutdownInProgress | StoreError::ShutdownTimeout(_) => {
                        Err(BookingError::ShutDown)
                    },
                }
            },
        }
    }

    // ========== Reads ==========

    /// Read-only copy of the collection, filtered at read time
    pub async fn snapshot(&self, filter: &BookingFilter) -> BookingSnapshot {
        self.runtime.state(|state| state.snapshot(filter)).await
    }

    /// Copy of one booking; draft keys resolve once the server assigned an id
    pub async fn get(&self, key: &BookingKey) -> Option<Booking> {
        self.runtime.state(|state| state.get(key).cloned()).await
    }

    /// Whether a change on the booking is waiting for the server
    pub async fn is_in_flight(&self, key: &BookingKey) -> bool {
        self.runtime.state(|state| state.pending(key).is_some()).await
    }

    /// Number of changes waiting for the server
    pub async fn pending_operations(&self) -> usize {
        self.runtime.state(BookingState::pending_count).await
    }

    // ========== Subscriptions ==========

    /// Watch a filtered view of the collection
    ///
    /// Dropping the subscription releases it.
    pub async fn subscribe(&self, filter: BookingFilter) -> Subscription {
        // Receiver first, then the snapshot, so no change falls in between
        let notifications = self.runtime.subscribe();
        let current = self.snapshot(&filter).await;
        Subscription::new(filter, current, notifications)
    }

    /// Call `callback` with the current view now and after every change
    ///
    /// Release it with [`SubscriptionHandle::unsubscribe`] on teardown;
    /// dropping the handle also releases it.
    pub async fn subscribe_with<F>(&self, filter: BookingFilter, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&BookingSnapshot) + Send + 'static,
    {
        SubscriptionHandle::spawn(self.subscribe(filter).await, callback)
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.runtime.subscriber_count()
    }

    /// Number of accepted commands whose caller still awaits the result
    #[must_use]
    pub fn awaiting_settlement(&self) -> usize {
        self.settlements.len()
    }

    // ========== Lifecycle ==========

    /// Stop accepting commands and let in-flight remote calls settle
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ShutdownTimeout`] if remote calls are still in
    /// flight after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BookingError> {
        self.runtime.shutdown(timeout).await.map_err(|error| match error {
            StoreError::ShutdownTimeout(pending) => BookingError::ShutdownTimeout(pending),
            StoreError::Rejected(error) => error,
            StoreError::ShutdownInProgress => BookingError::ShutDown,
        })
    }

    /// Shutdown with the configured default timeout
    ///
    /// # Errors
    ///
    /// As [`shutdown`](Self::shutdown).
    pub async fn shutdown_gracefully(&self) -> Result<(), BookingError> {
        self.shutdown(self.runtime.config().default_shutdown_timeout)
            .await
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.runtime.is_shutting_down()
    }
}

impl std::fmt::Debug for BookingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingStore")
            .field("pending_effects", &self.runtime.pending_effects())
            .field("settlements", &self.settlements)
            .finish_non_exhaustive()
    }
}
