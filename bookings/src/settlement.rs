//! Per-command settlement.
//!
//! Every accepted command registers a oneshot channel under its
//! [`CommandId`]. The reducer resolves it while reducing the command's
//! feedback action, so the result is delivered exactly once and no matter
//! how far behind the notification stream the caller is.

use crate::error::BookingError;
use crate::types::{Booking, BookingKey, BookingSnapshot, CommandId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Authoritative result a feedback action settled a command with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settled {
    /// Create or transition: the booking after reconciliation
    Booking(Booking),
    /// Role load: the role's view after merging
    Snapshot(BookingSnapshot),
}

/// What a waiting caller receives
pub type Outcome = Result<Settled, BookingError>;

/// Open settlement channels keyed by command
///
/// Shared between the store, which registers a channel before sending a
/// command, and the reducer, which resolves it from the feedback.
#[derive(Clone, Default)]
pub struct SettlementRegistry {
    waiters: Arc<Mutex<HashMap<CommandId, oneshot::Sender<Outcome>>>>,
}

impl SettlementRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands whose result is still awaited
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    /// Whether no command is awaiting its result
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }

    pub(crate) fn register(&self, command_id: CommandId) -> oneshot::Receiver<Outcome> {
        let (sender, receiver) = oneshot::channel();
        self.waiters().insert(command_id, sender);
        receiver
    }

    /// Drop the channel of a command that was never accepted
    pub(crate) fn forget(&self, command_id: CommandId) {
        self.waiters().remove(&command_id);
    }

    /// Deliver the result of `command_id`
    ///
    /// `outcome` is only evaluated when a channel is registered. Returns
    /// whether a caller was still listening.
    pub(crate) fn resolve<F>(&self, command_id: CommandId, outcome: F) -> bool
    where
        F: FnOnce() -> Outcome,
    {
        let Some(sender) = self.waiters().remove(&command_id) else {
            return false;
        };
        // The caller may have given up waiting
        sender.send(outcome()).is_ok()
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<CommandId, oneshot::Sender<Outcome>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SettlementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementRegistry")
            .field("waiting", &self.len())
            .finish()
    }
}

/// Final result of an accepted command
///
/// The optimistic change is already visible when a `Settlement` is handed
/// out. Awaiting it yields the server's authoritative values, or
/// [`BookingError::RemoteFailure`] once the change has been rolled back.
/// Dropping it does not cancel anything.
#[must_use = "a settlement reports whether the server accepted the change"]
pub struct Settlement<T> {
    command_id: CommandId,
    key: Option<BookingKey>,
    receiver: oneshot::Receiver<Outcome>,
    extract: fn(Settled) -> Result<T, BookingError>,
}

impl<T> Settlement<T> {
    pub(crate) const fn new(
        command_id: CommandId,
        key: Option<BookingKey>,
        receiver: oneshot::Receiver<Outcome>,
        extract: fn(Settled) -> Result<T, BookingError>,
    ) -> Self {
        Self {
            command_id,
            key,
            receiver,
            extract,
        }
    }

    /// Correlation id of the command
    pub const fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Booking the command targets (`None` for role loads)
    ///
    /// For a new booking this is its draft key, which keeps resolving after
    /// the server assigned an id.
    pub const fn key(&self) -> Option<&BookingKey> {
        self.key.as_ref()
    }

    /// Wait for the server's answer
    ///
    /// # Errors
    ///
    /// - [`BookingError::RemoteFailure`] if the remote call failed (already rolled back)
    /// - [`BookingError::ShutDown`] if the runtime went away before the call settled
    pub async fn settled(self) -> Result<T, BookingError> {
        match self.receiver.await {
            Ok(outcome) => outcome.and_then(self.extract),
            Err(_) => Err(BookingError::ShutDown),
        }
    }

    /// Wait for the server's answer, giving up after `timeout`
    ///
    /// Giving up only stops the wait; the booking keeps its pending operation
    /// until the remote call resolves.
    ///
    /// # Errors
    ///
    /// As [`settled`](Self::settled), plus [`BookingError::SettlementTimeout`].
    pub async fn settled_within(self, timeout: Duration) -> Result<T, BookingError> {
        tokio::time::timeout(timeout, self.settled())
            .await
            .map_err(|_| BookingError::SettlementTimeout(timeout))?
    }
}

impl<T> std::fmt::Debug for Settlement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settlement")
            .field("command_id", &self.command_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

pub(crate) fn booking(settled: Settled) -> Result<Booking, BookingError> {
    match settled {
        Settled::Booking(booking) => Ok(booking),
        Settled::Snapshot(_) => Err(BookingError::InvalidInput(
            "expected a booking settlement, got a snapshot".to_string(),
        )),
    }
}

pub(crate) fn snapshot(settled: Settled) -> Result<BookingSnapshot, BookingError> {
    match settled {
        Settled::Snapshot(snapshot) => Ok(snapshot),
        Settled::Booking(_) => Err(BookingError::InvalidInput(
            "expected a snapshot settlement, got a booking".to_string(),
        )),
    }
}
