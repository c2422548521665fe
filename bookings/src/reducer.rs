//! Booking reducer: validation, optimistic changes, reconciliation, rollback.
//!
//! Every command is validated against the locally-known state before anything
//! changes. An accepted command records a [`PendingOperation`] holding the
//! pre-change record, applies the optimistic change and returns one effect
//! performing the remote call. The feedback action either overwrites the
//! record with the server's values or restores the saved record.

use crate::actions::BookingAction;
use crate::environment::BookingEnvironment;
use crate::error::BookingError;
use crate::lifecycle::{self, BookingStatus, PaymentStatus};
use crate::service::ServiceError;
use crate::settlement::Settled;
use crate::types::{
    Booking, BookingFilter, BookingKey, BookingState, CommandId, CreateBooking, LocalId, OperationKind,
    PackageDetails, ParticipantId, PendingOperation, RemoteBooking, Role, TripId,
};
use std::sync::Arc;
use tripcarry_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};

type Effects = SmallVec<[Effect<BookingAction>; 4]>;

/// Reducer for the booking collection
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new `BookingReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    // ========== Validation ==========

    fn validate_request(
        trip_id: &TripId,
        counterpart_id: &ParticipantId,
        details: &PackageDetails,
    ) -> Result<(), BookingError> {
        if trip_id.as_str().trim().is_empty() {
            return Err(BookingError::InvalidInput("trip id is required".to_string()));
        }
        if counterpart_id.as_str().trim().is_empty() {
            return Err(BookingError::InvalidInput(
                "counterpart id is required".to_string(),
            ));
        }
        if details.size.trim().is_empty() {
            return Err(BookingError::InvalidInput(
                "package size is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a booking that may be mutated right now
    fn mutable_booking<'a>(
        state: &'a BookingState,
        key: &BookingKey,
    ) -> Result<&'a Booking, BookingError> {
        let booking = state
            .get(key)
            .ok_or_else(|| BookingError::NotFound(key.clone()))?;
        if state.pending(key).is_some() || booking.id().is_none() {
            return Err(BookingError::Conflict(booking.key.clone()));
        }
        Ok(booking)
    }

    // ========== Commands ==========

    fn request_booking(
        state: &mut BookingState,
        command_id: CommandId,
        local_id: LocalId,
        request: CreateBooking,
        env: &BookingEnvironment,
    ) -> Result<Effects, BookingError> {
        Self::validate_request(&request.trip_id, &request.counterpart_id, &request.details)?;

        if let Some(existing) = state.active_for(&request.trip_id, &request.counterpart_id) {
            return Err(BookingError::DuplicateBooking {
                trip_id: request.trip_id,
                counterpart_id: request.counterpart_id,
                existing: existing.key.clone(),
            });
        }

        let key = BookingKey::Draft(local_id);
        if state.get(&key).is_some() {
            return Err(BookingError::InvalidInput(format!("draft {key} already exists")));
        }

        state.insert(Booking::draft(
            local_id,
            request.trip_id.clone(),
            request.counterpart_id.clone(),
            request.details.clone(),
            env.clock.now(),
        ));
        state.begin(
            key.clone(),
            PendingOperation {
                command_id,
                kind: OperationKind::Create,
                previous: None,
            },
        );
        state.touch();

        tracing::debug!(%key, trip_id = %request.trip_id, "Booking draft created");

        let service = Arc::clone(&env.service);
        Ok(smallvec![Effect::future(async move {
            Some(match service.create(request).await {
                Ok(record) => BookingAction::CreateSettled {
                    command_id,
                    local_id,
                    record,
                },
                Err(error) => BookingAction::RemoteFailed {
                    command_id,
                    key,
                    error,
                },
            })
        })])
    }

    fn transition_status(
        state: &mut BookingState,
        command_id: CommandId,
        key: &BookingKey,
        target: BookingStatus,
        env: &BookingEnvironment,
    ) -> Result<Effects, BookingError> {
        let booking = Self::mutable_booking(state, key)?;
        let next = lifecycle::next_status(booking.status, target)?;

        let previous = booking.clone();
        let key = previous.key.clone();
        let Some(id) = previous.id().cloned() else {
            return Err(BookingError::Conflict(key));
        };

        if let Some(booking) = state.get_mut(&key) {
            booking.status = next;
            booking.updated_at = env.clock.now();
        }
        state.begin(
            key.clone(),
            PendingOperation {
                command_id,
                kind: OperationKind::Status(next),
                previous: Some(previous),
            },
        );
        state.touch();

        let service = Arc::clone(&env.service);
        Ok(smallvec![Effect::future(async move {
            Some(match service.update_status(id, next).await {
                Ok(record) => BookingAction::StatusSettled {
                    command_id,
                    key,
                    record,
                },
                Err(error) => BookingAction::RemoteFailed {
                    command_id,
                    key,
                    error,
                },
            })
        })])
    }

    fn transition_payment_status(
        state: &mut BookingState,
        command_id: CommandId,
        key: &BookingKey,
        target: PaymentStatus,
        env: &BookingEnvironment,
    ) -> Result<Effects, BookingError> {
        let booking = Self::mutable_booking(state, key)?;
        let next = lifecycle::next_payment_status(booking.status, booking.payment_status, target)?;

        let previous = booking.clone();
        let key = previous.key.clone();
        let Some(id) = previous.id().cloned() else {
            return Err(BookingError::Conflict(key));
        };

        if let Some(booking) = state.get_mut(&key) {
            booking.payment_status = next;
            booking.updated_at = env.clock.now();
        }
        state.begin(
            key.clone(),
            PendingOperation {
                command_id,
                kind: OperationKind::Payment(next),
                previous: Some(previous),
            },
        );
        state.touch();

        let service = Arc::clone(&env.service);
        Ok(smallvec![Effect::future(async move {
            Some(match service.update_payment_status(id, next).await {
                Ok(record) => BookingAction::PaymentSettled {
                    command_id,
                    key,
                    record,
                },
                Err(error) => BookingAction::RemoteFailed {
                    command_id,
                    key,
                    error,
                },
            })
        })])
    }

    fn load_for_role(
        command_id: CommandId,
        role: Role,
        env: &BookingEnvironment,
    ) -> Result<Effects, BookingError> {
        let (Role::Sender(id) | Role::Traveler(id)) = &role;
        if id.as_str().trim().is_empty() {
            return Err(BookingError::InvalidInput(
                "participant id is required".to_string(),
            ));
        }

        let service = Arc::clone(&env.service);
        Ok(smallvec![Effect::future(async move {
            Some(match service.list_by_role(role.clone()).await {
                Ok(records) => BookingAction::RoleLoaded {
                    command_id,
                    role,
                    records,
                },
                Err(error) => BookingAction::LoadFailed {
                    command_id,
                    role,
                    error,
                },
            })
        })])
    }

    // ========== Feedback ==========

    fn create_settled(
        state: &mut BookingState,
        command_id: CommandId,
        local_id: LocalId,
        record: &RemoteBooking,
    ) {
        let draft = BookingKey::Draft(local_id);
        if state.finish(&draft, command_id).is_none() {
            tracing::warn!(key = %draft, %command_id, "Ignoring create settlement with no pending operation");
            return;
        }

        state.rekey(local_id, record.id.clone());
        let key = BookingKey::Remote(record.id.clone());
        if let Some(booking) = state.get_mut(&key) {
            booking.reconcile(record);
        }
        state.touch();

        tracing::info!(%key, %local_id, "Booking created");
        metrics::counter!("bookings.settled", "operation" => "create").increment(1);
    }

    fn transition_settled(
        state: &mut BookingState,
        command_id: CommandId,
        key: &BookingKey,
        record: &RemoteBooking,
        operation: &'static str,
    ) {
        let Some(pending) = state.finish(key, command_id) else {
            tracing::warn!(%key, %command_id, "Ignoring settlement with no pending operation");
            return;
        };

        if let Some(booking) = state.get_mut(key) {
            let overridden = match pending.kind {
                OperationKind::Status(status) => status != record.status,
                OperationKind::Payment(payment) => payment != record.payment_status,
                OperationKind::Create => false,
            };
            if overridden {
                tracing::info!(
                    %key,
                    status = %record.status,
                    payment_status = %record.payment_status,
                    "Server overrode the requested change"
                );
                metrics::counter!("bookings.coerced", "operation" => operation).increment(1);
            }
            booking.reconcile(record);
        }
        state.touch();

        tracing::debug!(%key, operation, "Booking change settled");
        metrics::counter!("bookings.settled", "operation" => operation).increment(1);
    }

    fn roll_back(
        state: &mut BookingState,
        command_id: CommandId,
        key: &BookingKey,
        error: &ServiceError,
    ) {
        let Some(pending) = state.finish(key, command_id) else {
            tracing::warn!(%key, %command_id, "Ignoring failure with no pending operation");
            return;
        };

        let operation = match pending.kind {
            OperationKind::Create => "create",
            OperationKind::Status(_) => "status",
            OperationKind::Payment(_) => "payment",
        };

        match pending.previous {
            Some(previous) => {
                if let Some(booking) = state.get_mut(key) {
                    *booking = previous;
                }
            },
            None => {
                let key = state.resolve(key);
                state.remove(&key);
            },
        }
        state.touch();

        tracing::warn!(%key, operation, %error, "Remote call failed, rolled back");
        metrics::counter!("bookings.rollbacks", "operation" => operation).increment(1);
    }

    /// Reconcile a transition, unless the server described another booking
    fn settle_transition(
        state: &mut BookingState,
        env: &BookingEnvironment,
        command_id: CommandId,
        key: &BookingKey,
        record: RemoteBooking,
        operation: &'static str,
    ) {
        if let BookingKey::Remote(expected) = state.resolve(key) {
            if expected != record.id {
                let error = ServiceError::UnexpectedRecord {
                    expected,
                    returned: record.id,
                };
                Self::roll_back(state, command_id, key, &error);
                env.settlements
                    .resolve(command_id, || Err(BookingError::RemoteFailure(error)));
                return;
            }
        }

        Self::transition_settled(state, command_id, key, &record, operation);
        env.settlements.resolve(command_id, || {
            Ok(Settled::Booking(Self::settled_booking(state, record)))
        });
    }

    fn settled_booking(state: &BookingState, record: RemoteBooking) -> Booking {
        state
            .get(&BookingKey::Remote(record.id.clone()))
            .cloned()
            .unwrap_or_else(|| Booking::from(record))
    }

    fn role_loaded(state: &mut BookingState, role: &Role, records: Vec<RemoteBooking>) {
        let mut merged = 0_usize;
        let mut skipped = 0_usize;

        for record in records {
            let key = BookingKey::Remote(record.id.clone());
            // Claimed ids resolve to their draft, which is pending too
            if state.pending(&key).is_some() {
                skipped += 1;
                continue;
            }
            // The server already lists a booking whose create is in flight
            let claimant = record
                .status
                .is_active()
                .then(|| state.draft_for(&record.trip_id, &record.counterpart_id))
                .flatten();
            if let Some(local) = claimant {
                tracing::debug!(%key, %local, "Listed booking claimed by its draft");
                state.claim(record.id, local);
                skipped += 1;
                continue;
            }
            match state.get_mut(&key) {
                Some(booking) if booking.updated_at > record.updated_at => {
                    skipped += 1;
                    continue;
                },
                Some(booking) => booking.reconcile(&record),
                None => state.insert(Booking::from(record)),
            }
            merged += 1;
        }

        if merged > 0 {
            state.touch();
        }
        tracing::debug!(%role, merged, skipped, "Role bookings loaded");
    }
}

impl Reducer for BookingReducer {
    type State = BookingState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects, BookingError> {
        match action {
            // ========== Commands ==========
            BookingAction::RequestBooking {
                command_id,
                local_id,
                trip_id,
                counterpart_id,
                details,
            } => Self::request_booking(
                state,
                command_id,
                local_id,
                CreateBooking {
                    trip_id,
                    counterpart_id,
                    details,
                },
                env,
            ),

            BookingAction::TransitionStatus {
                command_id,
                key,
                target,
            } => Self::transition_status(state, command_id, &key, target, env),

            BookingAction::TransitionPaymentStatus {
                command_id,
                key,
                target,
            } => Self::transition_payment_status(state, command_id, &key, target, env),

            BookingAction::LoadForRole { command_id, role } => {
                Self::load_for_role(command_id, role, env)
            },

            // ========== Feedback ==========
            BookingAction::CreateSettled {
                command_id,
                local_id,
                record,
            } => {
                Self::create_settled(state, command_id, local_id, &record);
                env.settlements.resolve(command_id, || {
                    Ok(Settled::Booking(Self::settled_booking(state, record)))
                });
                Ok(SmallVec::new())
            },

            BookingAction::StatusSettled {
                command_id,
                key,
                record,
            } => {
                Self::settle_transition(state, env, command_id, &key, record, "status");
                Ok(SmallVec::new())
            },

            BookingAction::PaymentSettled {
                command_id,
                key,
                record,
            } => {
                Self::settle_transition(state, env, command_id, &key, record, "payment");
                Ok(SmallVec::new())
            },

            BookingAction::RemoteFailed {
                command_id,
                key,
                error,
            } => {
                Self::roll_back(state, command_id, &key, &error);
                env.settlements
                    .resolve(command_id, || Err(BookingError::RemoteFailure(error)));
                Ok(SmallVec::new())
            },

            BookingAction::RoleLoaded {
                command_id,
                role,
                records,
            } => {
                Self::role_loaded(state, &role, records);
                env.settlements.resolve(command_id, || {
                    Ok(Settled::Snapshot(state.snapshot(&BookingFilter::from(&role))))
                });
                Ok(SmallVec::new())
            },

            BookingAction::LoadFailed {
                command_id,
                role,
                error,
            } => {
                tracing::warn!(%role, %error, "Loading role bookings failed");
                metrics::counter!("bookings.load_failures").increment(1);
                env.settlements
                    .resolve(command_id, || Err(BookingError::RemoteFailure(error)));
                Ok(SmallVec::new())
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::InMemoryBookingService;
    use crate::types::BookingId;
    use chrono::{DateTime, Duration, Utc};
    use tripcarry_core::environment::Clock;
    use tripcarry_testing::{assertions, test_clock, ManualClock, ReducerTest};

    fn env() -> BookingEnvironment {
        let clock = Arc::new(test_clock());
        BookingEnvironment::new(Arc::new(InMemoryBookingService::new(clock.clone())), clock)
    }

    fn now() -> DateTime<Utc> {
        test_clock().now()
    }

    fn request(local_id: LocalId, trip: &str, sender: &str) -> BookingAction {
        BookingAction::RequestBooking {
            command_id: CommandId::new(),
            local_id,
            trip_id: TripId::from(trip),
            counterpart_id: ParticipantId::from(sender),
            details: PackageDetails::new("small", "books"),
        }
    }

    fn record(id: &str, status: BookingStatus, payment_status: PaymentStatus) -> RemoteBooking {
        RemoteBooking {
            id: BookingId::from(id),
            trip_id: TripId::from("T1"),
            counterpart_id: ParticipantId::from("S1"),
            traveler_id: None,
            details: PackageDetails::new("small", "books"),
            status,
            payment_status,
            payment_due: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    /// State holding one settled booking
    fn state_with(record: RemoteBooking) -> BookingState {
        let mut state = BookingState::new();
        state.insert(Booking::from(record));
        state
    }

    fn transition(key: &str, target: BookingStatus) -> BookingAction {
        BookingAction::TransitionStatus {
            command_id: CommandId::new(),
            key: BookingKey::from(key),
            target,
        }
    }

    #[test]
    fn request_adds_pending_draft_and_remote_call() {
        let local_id = LocalId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(request(local_id, "T1", "S1"))
            .then_state(move |state| {
                let draft = state.get(&BookingKey::Draft(local_id)).unwrap();
                assert_eq!(draft.status, BookingStatus::Pending);
                assert_eq!(draft.payment_status, PaymentStatus::Pending);
                assert!(state.pending(&BookingKey::Draft(local_id)).is_some());
                assert_eq!(state.version(), 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn request_without_size_is_invalid_input() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(BookingAction::RequestBooking {
                command_id: CommandId::new(),
                local_id: LocalId::new(),
                trip_id: TripId::from("T1"),
                counterpart_id: ParticipantId::from("S1"),
                details: PackageDetails::new("  ", "books"),
            })
            .then_error(|error| assert!(matches!(error, BookingError::InvalidInput(_))))
            .then_state(|state| {
                assert!(state.is_empty());
                assert_eq!(state.version(), 0);
            })
            .run();
    }

    #[test]
    fn second_request_on_same_pairing_is_duplicate() {
        let first = LocalId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(request(first, "T1", "S1"))
            .when_action(request(LocalId::new(), "T1", "S1"))
            .then_error(move |error| {
                assert_eq!(
                    *error,
                    BookingError::DuplicateBooking {
                        trip_id: TripId::from("T1"),
                        counterpart_id: ParticipantId::from("S1"),
                        existing: BookingKey::Draft(first),
                    }
                );
            })
            .then_state(|state| assert_eq!(state.len(), 1))
            .run();
    }

    #[test]
    fn cancelled_pairing_can_be_booked_again() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Cancelled,
                PaymentStatus::Pending,
            )))
            .when_action(request(LocalId::new(), "T1", "S1"))
            .then_state(|state| assert_eq!(state.len(), 2))
            .run();
    }

    #[test]
    fn transition_is_applied_optimistically() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Confirmed))
            .then_state(|state| {
                let key = BookingKey::from("B100");
                assert_eq!(state.get(&key).unwrap().status, BookingStatus::Confirmed);
                let pending = state.pending(&key).unwrap();
                assert_eq!(pending.kind, OperationKind::Status(BookingStatus::Confirmed));
                assert_eq!(
                    pending.previous.as_ref().unwrap().status,
                    BookingStatus::Pending
                );
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn second_transition_while_in_flight_conflicts() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Confirmed))
            .when_action(transition("B100", BookingStatus::Confirmed))
            .then_error(|error| {
                assert_eq!(*error, BookingError::Conflict(BookingKey::from("B100")));
            })
            .then_state(|state| {
                assert_eq!(state.pending_count(), 1);
                assert_eq!(state.version(), 1);
            })
            .run();
    }

    #[test]
    fn skipping_confirmation_is_invalid_transition() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Completed))
            .then_error(|error| assert!(matches!(error, BookingError::InvalidTransition(_))))
            .then_state(|state| {
                assert_eq!(state.pending_count(), 0);
                assert_eq!(
                    state.get(&BookingKey::from("B100")).unwrap().status,
                    BookingStatus::Pending
                );
            })
            .run();
    }

    #[test]
    fn unknown_booking_is_not_found() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(transition("B404", BookingStatus::Confirmed))
            .then_error(|error| {
                assert_eq!(*error, BookingError::NotFound(BookingKey::from("B404")));
            })
            .run();
    }

    #[test]
    fn payment_before_confirmation_is_rejected() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(BookingAction::TransitionPaymentStatus {
                command_id: CommandId::new(),
                key: BookingKey::from("B100"),
                target: PaymentStatus::Paid,
            })
            .then_error(|error| assert!(matches!(error, BookingError::InvalidTransition(_))))
            .then_state(|state| assert_eq!(state.pending_count(), 0))
            .run();
    }

    #[test]
    fn draft_cannot_be_transitioned_before_create_settles() {
        let local_id = LocalId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(request(local_id, "T1", "S1"))
            .when_action(BookingAction::TransitionStatus {
                command_id: CommandId::new(),
                key: BookingKey::Draft(local_id),
                target: BookingStatus::Cancelled,
            })
            .then_error(move |error| {
                assert_eq!(*error, BookingError::Conflict(BookingKey::Draft(local_id)));
            })
            .run();
    }

    #[test]
    fn create_settlement_rekeys_the_draft() {
        let local_id = LocalId::new();
        let command_id = CommandId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(BookingAction::RequestBooking {
                command_id,
                local_id,
                trip_id: TripId::from("T1"),
                counterpart_id: ParticipantId::from("S1"),
                details: PackageDetails::new("small", "books"),
            })
            .when_action(BookingAction::CreateSettled {
                command_id,
                local_id,
                record: record("B100", BookingStatus::Pending, PaymentStatus::Pending),
            })
            .then_effects(assertions::assert_no_effects)
            .then_state(move |state| {
                let booking = state.get(&BookingKey::from("B100")).unwrap();
                assert_eq!(booking.key, BookingKey::from("B100"));
                assert_eq!(state.len(), 1);
                assert_eq!(state.pending_count(), 0);
                // The draft key keeps resolving
                assert_eq!(
                    state.get(&BookingKey::Draft(local_id)).unwrap().key,
                    BookingKey::from("B100")
                );
            })
            .run();
    }

    #[test]
    fn failed_create_removes_the_draft() {
        let local_id = LocalId::new();
        let command_id = CommandId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(BookingAction::RequestBooking {
                command_id,
                local_id,
                trip_id: TripId::from("T1"),
                counterpart_id: ParticipantId::from("S1"),
                details: PackageDetails::new("small", "books"),
            })
            .when_action(BookingAction::RemoteFailed {
                command_id,
                key: BookingKey::Draft(local_id),
                error: ServiceError::Transport("connection reset".to_string()),
            })
            .then_state(|state| {
                assert!(state.is_empty());
                assert_eq!(state.pending_count(), 0);
            })
            .run();
    }

    #[test]
    fn failed_transition_restores_previous_record() {
        let command_id = CommandId::new();
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(BookingAction::TransitionStatus {
                command_id,
                key: BookingKey::from("B100"),
                target: BookingStatus::Confirmed,
            })
            .when_action(BookingAction::RemoteFailed {
                command_id,
                key: BookingKey::from("B100"),
                error: ServiceError::Http {
                    status: 500,
                    message: "boom".to_string(),
                },
            })
            .then_state(|state| {
                let booking = state.get(&BookingKey::from("B100")).unwrap();
                let original = record("B100", BookingStatus::Pending, PaymentStatus::Pending);
                assert_eq!(*booking, Booking::from(original));
                assert_eq!(state.pending_count(), 0);
            })
            .run();
    }

    #[test]
    fn server_values_overwrite_the_optimistic_change() {
        let command_id = CommandId::new();
        let mut coerced = record("B100", BookingStatus::Cancelled, PaymentStatus::Pending);
        coerced.updated_at = now() + Duration::minutes(1);

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(BookingAction::TransitionStatus {
                command_id,
                key: BookingKey::from("B100"),
                target: BookingStatus::Confirmed,
            })
            .when_action(BookingAction::StatusSettled {
                command_id,
                key: BookingKey::from("B100"),
                record: coerced,
            })
            .then_state(|state| {
                let booking = state.get(&BookingKey::from("B100")).unwrap();
                assert_eq!(booking.status, BookingStatus::Cancelled);
                assert_eq!(booking.updated_at, now() + Duration::minutes(1));
                assert_eq!(state.pending_count(), 0);
            })
            .run();
    }

    #[test]
    fn answer_for_another_booking_rolls_back() {
        let command_id = CommandId::new();
        let env = env();
        let mut receiver = env.settlements.register(command_id);

        ReducerTest::new(BookingReducer::new())
            .with_env(env)
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(BookingAction::TransitionStatus {
                command_id,
                key: BookingKey::from("B100"),
                target: BookingStatus::Confirmed,
            })
            .when_action(BookingAction::StatusSettled {
                command_id,
                key: BookingKey::from("B100"),
                record: record("B200", BookingStatus::Confirmed, PaymentStatus::Pending),
            })
            .then_state(|state| {
                let booking = state.get(&BookingKey::from("B100")).unwrap();
                assert_eq!(booking.status, BookingStatus::Pending);
                assert_eq!(state.pending_count(), 0);
                assert!(state.get(&BookingKey::from("B200")).is_none());
            })
            .run();

        assert_eq!(
            receiver.try_recv().unwrap(),
            Err(BookingError::RemoteFailure(ServiceError::UnexpectedRecord {
                expected: BookingId::from("B100"),
                returned: BookingId::from("B200"),
            }))
        );
    }

    #[test]
    fn settlement_for_another_command_is_ignored() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Confirmed))
            .when_action(BookingAction::RemoteFailed {
                command_id: CommandId::new(),
                key: BookingKey::from("B100"),
                error: ServiceError::Transport("late".to_string()),
            })
            .then_state(|state| {
                let key = BookingKey::from("B100");
                assert_eq!(state.get(&key).unwrap().status, BookingStatus::Confirmed);
                assert!(state.pending(&key).is_some());
            })
            .run();
    }

    #[test]
    fn load_merges_without_touching_in_flight_bookings() {
        let mut remote_view = record("B100", BookingStatus::Cancelled, PaymentStatus::Pending);
        remote_view.updated_at = now() + Duration::minutes(5);
        let mut other = record("B101", BookingStatus::Confirmed, PaymentStatus::Paid);
        other.trip_id = TripId::from("T2");

        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Confirmed))
            .when_action(BookingAction::RoleLoaded {
                command_id: CommandId::new(),
                role: Role::Sender(ParticipantId::from("S1")),
                records: vec![remote_view, other],
            })
            .then_state(|state| {
                assert_eq!(state.len(), 2);
                assert_eq!(
                    state.get(&BookingKey::from("B100")).unwrap().status,
                    BookingStatus::Confirmed
                );
                assert_eq!(
                    state.get(&BookingKey::from("B101")).unwrap().payment_status,
                    PaymentStatus::Paid
                );
            })
            .run();
    }

    #[test]
    fn optimistic_change_is_stamped_with_the_local_clock() {
        let clock = Arc::new(ManualClock::new(now()));
        let env = BookingEnvironment::new(
            Arc::new(InMemoryBookingService::new(clock.clone())),
            clock.clone(),
        );
        clock.advance(Duration::minutes(3));

        ReducerTest::new(BookingReducer::new())
            .with_env(env)
            .given_state(state_with(record(
                "B100",
                BookingStatus::Pending,
                PaymentStatus::Pending,
            )))
            .when_action(transition("B100", BookingStatus::Cancelled))
            .then_state(|state| {
                let booking = state.get(&BookingKey::from("B100")).unwrap();
                assert_eq!(booking.created_at, now());
                assert_eq!(booking.updated_at, now() + Duration::minutes(3));
            })
            .run();
    }

    #[test]
    fn load_with_blank_participant_is_invalid_input() {
        ReducerTest::new(BookingReducer::new())
            .with_env(env())
            .given_state(BookingState::new())
            .when_action(BookingAction::LoadForRole {
                command_id: CommandId::new(),
                role: Role::Traveler(ParticipantId::from("")),
            })
            .then_error(|error| assert!(matches!(error, BookingError::InvalidInput(_))))
            .run();
    }
}
