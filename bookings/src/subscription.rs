//! Fan-out of collection snapshots to UI surfaces.
//!
//! Every surface reads from the same runtime notification stream and
//! filters at read time, so two surfaces never disagree about a booking.
//! A subscriber that falls behind skips straight to a newer snapshot: each
//! notification carries the whole collection, so nothing is lost but
//! intermediate views.

use crate::store::BookingNotification;
use crate::types::{BookingFilter, BookingSnapshot};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Channel-style subscription to a filtered view
///
/// Yields a new snapshot whenever the filtered view changes. Dropping it
/// releases the subscription.
pub struct Subscription {
    filter: BookingFilter,
    current: BookingSnapshot,
    notifications: broadcast::Receiver<BookingNotification>,
}

impl Subscription {
    pub(crate) const fn new(
        filter: BookingFilter,
        current: BookingSnapshot,
        notifications: broadcast::Receiver<BookingNotification>,
    ) -> Self {
        Self {
            filter,
            current,
            notifications,
        }
    }

    /// The view this subscription watches
    #[must_use]
    pub const fn filter(&self) -> &BookingFilter {
        &self.filter
    }

    /// Last snapshot delivered (or taken at subscription time)
    #[must_use]
    pub const fn current(&self) -> &BookingSnapshot {
        &self.current
    }

    /// Wait for the next change of the filtered view
    ///
    /// Changes that leave the view untouched are skipped. Returns `None`
    /// once the store is gone.
    pub async fn recv(&mut self) -> Option<BookingSnapshot> {
        loop {
            match self.notifications.recv().await {
                Ok(notification) => {
                    let snapshot = notification.state.snapshot(&self.filter);
                    if snapshot.same_view(&self.current) {
                        continue;
                    }
                    self.current = snapshot.clone();
                    return Some(snapshot);
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, filter = ?self.filter, "Subscriber lagged, skipping ahead");
                    metrics::counter!("bookings.subscriptions.lagged").increment(skipped);
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("version", &self.current.version)
            .finish_non_exhaustive()
    }
}

/// Callback-style subscription
///
/// The callback runs on a tokio task, one snapshot at a time, in the order
/// the changes were made. Dropping the handle releases the subscription.
#[must_use = "dropping the handle unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Deliver the current snapshot now, then every change from a task
    pub(crate) fn spawn<F>(mut subscription: Subscription, mut callback: F) -> Self
    where
        F: FnMut(&BookingSnapshot) + Send + 'static,
    {
        callback(subscription.current());
        metrics::gauge!("bookings.subscriptions.active").increment(1.0);

        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                callback(&snapshot);
            }
        });

        Self { task }
    }

    /// Release the subscription
    ///
    /// Once this returns the callback will not be called again.
    pub async fn unsubscribe(mut self) {
        self.task.abort();
        // Cancelled is the expected outcome; a panic inside the callback is
        // reported by tokio already
        let _ = (&mut self.task).await;
    }

    /// Whether the subscription is still delivering
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        metrics::gauge!("bookings.subscriptions.active").decrement(1.0);
    }
}
