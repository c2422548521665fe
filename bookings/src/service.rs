//! Remote booking service contract.
//!
//! The remote service is the source of truth. The store only talks to it
//! through [`BookingService`], so the HTTP transport, an in-memory stand-in
//! and decorators such as [`TimeoutBookingService`] are interchangeable.

use crate::lifecycle::{BookingStatus, PaymentStatus};
use crate::types::{BookingId, CreateBooking, RemoteBooking, Role};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result of a remote call
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Transport or server failure of a remote call
///
/// The store treats every variant the same way: roll back, then report
/// [`crate::BookingError::RemoteFailure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No response within the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code (4xx/5xx)
        status: u16,
        /// Body or reason phrase
        message: String,
    },

    /// The service refused the change
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service answered with a different booking than the one changed
    #[error("expected booking {expected}, got {returned}")]
    UnexpectedRecord {
        /// Booking the call targeted
        expected: BookingId,
        /// Booking the response described
        returned: BookingId,
    },
}

/// Operations of the remote booking service
///
/// Futures are boxed and `'static` so a call can be moved into an effect and
/// outlive the borrow of the service.
pub trait BookingService: Send + Sync {
    /// Create a booking; the server assigns its id and initial statuses
    fn create(&self, request: CreateBooking) -> BoxFuture<'static, ServiceResult<RemoteBooking>>;

    /// Bookings visible to a sender or traveler
    fn list_by_role(&self, role: Role) -> BoxFuture<'static, ServiceResult<Vec<RemoteBooking>>>;

    /// Move the delivery status; the server may coerce the result
    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>>;

    /// Move the payment status
    fn update_payment_status(
        &self,
        id: BookingId,
        payment_status: PaymentStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>>;
}

/// Bounds every remote call with a deadline
///
/// A call that never resolves would otherwise hold its booking in the
/// optimistic state forever. Expired calls fail with
/// [`ServiceError::Timeout`], which rolls the booking back like any other
/// remote failure.
#[derive(Clone)]
pub struct TimeoutBookingService {
    inner: Arc<dyn BookingService>,
    timeout: Duration,
}

impl TimeoutBookingService {
    /// Wrap `inner`, failing calls that take longer than `timeout`
    #[must_use]
    pub fn new(inner: Arc<dyn BookingService>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured deadline
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bounded<T: Send + 'static>(
        &self,
        operation: &'static str,
        call: BoxFuture<'static, ServiceResult<T>>,
    ) -> BoxFuture<'static, ServiceResult<T>> {
        let timeout = self.timeout;
        Box::pin(async move {
            if let Ok(result) = tokio::time::timeout(timeout, call).await {
                result
            } else {
                tracing::warn!(operation, ?timeout, "Remote booking call timed out");
                metrics::counter!("bookings.remote.timeouts", "operation" => operation)
                    .increment(1);
                Err(ServiceError::Timeout(timeout))
            }
        })
    }
}

impl std::fmt::Debug for TimeoutBookingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutBookingService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BookingService for TimeoutBookingService {
    fn create(&self, request: CreateBooking) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.bounded("create", self.inner.create(request))
    }

    fn list_by_role(&self, role: Role) -> BoxFuture<'static, ServiceResult<Vec<RemoteBooking>>> {
        self.bounded("list_by_role", self.inner.list_by_role(role))
    }

    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.bounded("update_status", self.inner.update_status(id, status))
    }

    fn update_payment_status(
        &self,
        id: BookingId,
        payment_status: PaymentStatus,
    ) -> BoxFuture<'static, ServiceResult<RemoteBooking>> {
        self.bounded(
            "update_payment_status",
            self.inner.update_payment_status(id, payment_status),
        )
    }
}
