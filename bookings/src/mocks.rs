//! In-memory booking service for development and testing.
//!
//! Behaves like the real service (assigns ids, validates transitions,
//! stamps payment deadlines) and adds the knobs tests need: latency, failure
//! injection, a pause gate that holds calls in flight, and status coercion.

use crate::lifecycle::{self, BookingStatus, PaymentStatus};
use crate::service::{BookingService, ServiceError, ServiceResult};
use crate::types::{BookingId, CreateBooking, ParticipantId, RemoteBooking, Role, TripId};
use chrono::Duration as ChronoDuration;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tripcarry_core::environment::Clock;

/// First id handed out (`B100`)
const FIRST_ID: u64 = 100;

/// How long a sender has to pay once the traveler confirmed
const PAYMENT_WINDOW_DAYS: i64 = 7;

/// Remote operation, as recorded in the call log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `create`
    Create,
    /// `list_by_role`
    ListByRole,
    /// `update_status`
    UpdateStatus,
    /// `update_payment_status`
    UpdatePaymentStatus,
}

impl Operation {
    /// Every operation of the service contract
    pub const ALL: [Self; 4] = [
        Self::Create,
        Self::ListByRole,
        Self::UpdateStatus,
        Self::UpdatePaymentStatus,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::ListByRole => "list_by_role",
            Self::UpdateStatus => "update_status",
            Self::UpdatePaymentStatus => "update_payment_status",
        })
    }
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<RemoteBooking>,
    next_id: u64,
    latency: Duration,
    failures: HashMap<Operation, ServiceError>,
    coercions: HashMap<BookingStatus, BookingStatus>,
    travelers: HashMap<TripId, ParticipantId>,
    calls: Vec<Operation>,
}

impl Ledger {
    fn record_mut(&mut self, id: &BookingId) -> ServiceResult<&mut RemoteBooking> {
        self.records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| ServiceError::Http {
                status: 404,
                message: format!("booking {id} not found"),
            })
    }
}

/// Authoritative in-memory stand-in for the remote booking service
///
/// Cloning shares the same ledger.
///
/// # Example
///
/// ```ignore
/// let remote = InMemoryBookingService::new(Arc::new(SystemClock))
///     .with_latency(Duration::from_millis(150));
/// remote.fail_next(Operation::UpdateStatus, ServiceError::Transport("reset".into()));
/// ```
#[derive(Clone)]
pub struct InMemoryBookingService {
    ledger: Arc<Mutex<Ledger>>,
    gate: Arc<watch::Sender<Vec<Operation>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBookingService {
    /// Creates an empty service; ids start at `B100`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (gate, _) = watch::channel(Vec::new());
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                next_id: FIRST_ID,
                ..Ledger::default()
            })),
            gate: Arc::new(gate),
            clock,
        }
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change the simulated latency
    pub fn set_latency(&self, latency: Duration) {
        self.ledger().latency = latency;
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: Operation, error: ServiceError) {
        self.ledger().failures.insert(operation, error);
    }

    /// Answer status updates requesting `requested` with `returned` instead
    pub fn coerce_status(&self, requested: BookingStatus, returned: BookingStatus) {
        self.ledger().coercions.insert(requested, returned);
    }

    /// Bookings created on `trip_id` get `traveler_id` as their traveler
    pub fn assign_traveler(&self, trip_id: impl Into<TripId>, traveler_id: impl Into<ParticipantId>) {
        self.ledger()
            .travelers
            .insert(trip_id.into(), traveler_id.into());
    }

    /// Hold every call until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.gate.send_replace(Operation::ALL.to_vec());
    }

    /// Hold calls of one operation only; others go through
    pub fn pause_only(&self, operation: Operation) {
        self.gate.send_modify(|paused| {
            if !paused.contains(&operation) {
                paused.push(operation);
            }
        });
    }

    /// Release held calls
    pub fn resume(&self) {
        self.gate.send_replace(Vec::new());
    }

    /// Add a record as if another client had created it
    pub fn seed(&self, record: RemoteBooking) {
        let mut ledger = self.ledger();
        ledger.records.retain(|r| r.id != record.id);
        ledger.records.push(record);
    }

    /// Every record the service holds
    #[must_use]
    pub fn records(&self) -> Vec<RemoteBooking> {
        self.ledger().records.clone()
    }

    /// One record by id
    #[must_use]
    pub fn record(&self, id: &BookingId) -> Option<RemoteBooking> {
        self.ledger().records.iter().find(|r| &r.id == id).cloned()
    }

    /// Operations that reached the service, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<Operation> {
        self.ledger().calls.clone()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `apply` against the ledger after the gate and the latency
    fn call<T, F>(&self, operation: Operation, apply: F) -> BoxFuture<'static, ServiceResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Ledger, &dyn Clock) -> ServiceResult<T> + Send + 'static,
    {
        let service = self.clone();
        Box::pin(async move {
            let latency = {
                let mut ledger = service.ledger();
                ledger.calls.push(operation);
                ledger.latency
            };

            let mut gate = service.gate.subscribe();
            // The sender lives in `service`, so the channel cannot close here
            let _ = gate.wait_for(|paused| !paused.contains(&operation)).await;

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut ledger = service.ledger();
            if let Some(error) = ledger.failures.remove(&operation) {
                tracing::debug!(%operation, %error, "Injected remote failure");
                return Err(error);
            }
            apply(&mut ledger, service.clock.as_ref())
        })
    }
}

impl fmt::Debug for InMemoryBookingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.ledger();
        f.debug_struct("InMemoryBookingService")
            .field("records", &ledger.records.len())
            .field("next_id", &ledger.next_id)
            .field("paused", &*self.gate.borrow())
            .finish_non_exhaustive()
    }
}

impl BookingService for InMemoryBookingService {
    fn create(&self, request: CreateBooking) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.call(Operation::Create, move |ledger, clock| {
            if request.details.size.trim().is_empty() {
                return Err(ServiceError::Http {
                    status: 422,
                    message: "package size is required".to_string(),
                });
            }

            let now = clock.now();
            let id = BookingId::new(format!("B{}", ledger.next_id));
            ledger.next_id += 1;

            let record = RemoteBooking {
                id,
                traveler_id: ledger.travelers.get(&request.trip_id).cloned(),
                trip_id: request.trip_id,
                counterpart_id: request.counterpart_id,
                details: request.details,
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_due: None,
                created_at: now,
                updated_at: now,
            };
            ledger.records.push(record.clone());
            Ok(record)
        })
    }

    fn list_by_role(&self, role: Role) -> BoxFuture<'static, ServiceResult<Vec<RemoteBooking>>> {
        self.call(Operation::ListByRole, move |ledger, _| {
            Ok(ledger
                .records
                .iter()
                .filter(|r| role.sees(r))
                .cloned()
                .collect())
        })
    }

    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.call(Operation::UpdateStatus, move |ledger, clock| {
            let coerced = ledger.coercions.get(&status).copied();
            let record = ledger.record_mut(&id)?;

            let status = match coerced {
                Some(returned) => returned,
                None => lifecycle::next_status(record.status, status)
                    .map_err(|e| ServiceError::Rejected(e.to_string()))?,
            };

            let now = clock.now();
            record.status = status;
            record.updated_at = now;
            if status == BookingStatus::Confirmed && record.payment_due.is_none() {
                record.payment_due = Some(now + ChronoDuration::days(PAYMENT_WINDOW_DAYS));
            }
            Ok(record.clone())
        })
    }

    fn update_payment_status(
        &self,
        id: BookingId,
        payment_status: PaymentStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.call(Operation::UpdatePaymentStatus, move |ledger, clock| {
            let record = ledger.record_mut(&id)?;
            record.payment_status =
                lifecycle::next_payment_status(record.status, record.payment_status, payment_status)
                    .map_err(|e| ServiceError::Rejected(e.to_string()))?;
            record.updated_at = clock.now();
            Ok(record.clone())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::types::PackageDetails;
    use tripcarry_testing::test_clock;

    fn service() -> InMemoryBookingService {
        InMemoryBookingService::new(Arc::new(test_clock()))
    }

    fn request(trip: &str, sender: &str) -> CreateBooking {
        CreateBooking {
            trip_id: TripId::from(trip),
            counterpart_id: ParticipantId::from(sender),
            details: PackageDetails::new("small", "keys"),
        }
    }

    #[tokio::test]
    async fn assigns_sequential_ids() {
        let service = service();
        let first = service.create(request("T1", "S1")).await.unwrap();
        let second = service.create(request("T2", "S1")).await.unwrap();

        assert_eq!(first.id.as_str(), "B100");
        assert_eq!(second.id.as_str(), "B101");
        assert_eq!(service.calls(), vec![Operation::Create, Operation::Create]);
    }

    #[tokio::test]
    async fn confirmation_stamps_payment_deadline() {
        let service = service();
        let created = service.create(request("T1", "S1")).await.unwrap();
        assert!(created.payment_due.is_none());

        let confirmed = service
            .update_status(created.id.clone(), BookingStatus::Confirmed)
            .await
            .unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(
            confirmed.payment_due,
            Some(test_clock().now() + ChronoDuration::days(7))
        );
    }

    #[tokio::test]
    async fn rejects_transitions_the_lifecycle_forbids() {
        let service = service();
        let created = service.create(request("T1", "S1")).await.unwrap();

        let result = service
            .update_payment_status(created.id, PaymentStatus::Paid)
            .await;
        assert!(matches!(result, Err(ServiceError::Rejected(_))));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let service = service();
        service.fail_next(
            Operation::Create,
            ServiceError::Http {
                status: 503,
                message: "unavailable".to_string(),
            },
        );

        assert!(service.create(request("T1", "S1")).await.is_err());
        assert!(service.records().is_empty());
        assert!(service.create(request("T1", "S1")).await.is_ok());
    }

    #[tokio::test]
    async fn coercion_overrides_requested_status() {
        let service = service();
        let created = service.create(request("T1", "S1")).await.unwrap();
        service.coerce_status(BookingStatus::Confirmed, BookingStatus::Cancelled);

        let record = service
            .update_status(created.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(record.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn lists_by_role() {
        let service = service();
        service.assign_traveler("T1", "traveler@example.com");
        service.create(request("T1", "S1")).await.unwrap();
        service.create(request("T2", "S2")).await.unwrap();

        let sender = service
            .list_by_role(Role::Sender(ParticipantId::from("S2")))
            .await
            .unwrap();
        assert_eq!(sender.len(), 1);
        assert_eq!(sender[0].trip_id.as_str(), "T2");

        let traveler = service
            .list_by_role(Role::Traveler(ParticipantId::from("traveler@example.com")))
            .await
            .unwrap();
        assert_eq!(traveler.len(), 1);
        assert_eq!(traveler[0].id.as_str(), "B100");
    }

    #[tokio::test]
    async fn pausing_one_operation_lets_others_through() {
        let service = service();
        let created = service.create(request("T1", "S1")).await.unwrap();
        service.pause_only(Operation::UpdateStatus);

        let held = tokio::spawn(service.update_status(created.id, BookingStatus::Confirmed));
        let listed = service
            .list_by_role(Role::Sender(ParticipantId::from("S1")))
            .await
            .unwrap();
        assert_eq!(listed[0].status, BookingStatus::Pending);
        assert!(!held.is_finished());

        service.resume();
        assert_eq!(held.await.unwrap().unwrap().status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn pause_holds_calls_until_resumed() {
        let service = service();
        service.pause();

        let pending = tokio::spawn(service.create(request("T1", "S1")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(service.records().is_empty());
        assert_eq!(service.calls(), vec![Operation::Create]);

        service.resume();
        let record = pending.await.unwrap().unwrap();
        assert_eq!(record.id.as_str(), "B100");
    }
}
