//! Domain types for the booking lifecycle.
//!
//! A booking pairs a traveler's trip with a sender's package request. The
//! client only holds identifiers for trips and participants; the full
//! records live in their own directories.

use crate::lifecycle::{BookingStatus, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier assigned by the remote booking service (immutable once assigned)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    /// Wrap a server-assigned identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Temporary identifier of a booking that the server has not created yet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Creates a new random `LocalId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `LocalId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Key of a booking in the collection
///
/// Drafts are keyed locally until the create call settles, then rekeyed by
/// their server id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKey {
    /// Pending-create draft
    Draft(LocalId),
    /// Booking known to the server
    Remote(BookingId),
}

impl BookingKey {
    /// Server id, if assigned
    #[must_use]
    pub const fn remote_id(&self) -> Option<&BookingId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Draft(_) => None,
        }
    }

    /// Whether this key names a pending-create draft
    #[must_use]
    pub const fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }
}

impl fmt::Display for BookingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft(id) => id.fmt(f),
            Self::Remote(id) => id.fmt(f),
        }
    }
}

impl From<BookingId> for BookingKey {
    fn from(id: BookingId) -> Self {
        Self::Remote(id)
    }
}

impl From<LocalId> for BookingKey {
    fn from(id: LocalId) -> Self {
        Self::Draft(id)
    }
}

impl From<&str> for BookingKey {
    fn from(id: &str) -> Self {
        Self::Remote(BookingId::new(id))
    }
}

/// Trip whose luggage capacity a booking consumes
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    /// Wrap a trip identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TripId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A sender or traveler (email or user id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a participant identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Correlates a command with its settlement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Creates a new random `CommandId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// What the sender wants carried
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDetails {
    /// Free-form size, e.g. "small" or "30x20x10cm"
    pub size: String,
    /// Free-form description of the contents
    #[serde(default)]
    pub description: String,
}

impl PackageDetails {
    /// Creates package details
    #[must_use]
    pub fn new(size: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            size: size.into(),
            description: description.into(),
        }
    }
}

/// A booking as the client knows it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Collection key (draft or server id)
    pub key: BookingKey,
    /// Trip being booked
    pub trip_id: TripId,
    /// Sender / package request on the other side of the pairing
    pub counterpart_id: ParticipantId,
    /// Traveler owning the trip, once the server has resolved it
    pub traveler_id: Option<ParticipantId>,
    /// Package being carried
    pub details: PackageDetails,
    /// Delivery status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Payment deadline, stamped by the server
    pub payment_due: Option<DateTime<Utc>>,
    /// When the booking was requested
    pub created_at: DateTime<Utc>,
    /// Last local or server change
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A fresh pending-create draft
    #[must_use]
    pub const fn draft(
        local_id: LocalId,
        trip_id: TripId,
        counterpart_id: ParticipantId,
        details: PackageDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: BookingKey::Draft(local_id),
            trip_id,
            counterpart_id,
            traveler_id: None,
            details,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_due: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Server id, if assigned
    #[must_use]
    pub const fn id(&self) -> Option<&BookingId> {
        self.key.remote_id()
    }

    /// Whether this booking occupies its (trip, counterpart) pairing
    #[must_use]
    pub fn occupies(&self, trip_id: &TripId, counterpart_id: &ParticipantId) -> bool {
        self.status.is_active() && &self.trip_id == trip_id && &self.counterpart_id == counterpart_id
    }

    /// Overwrite every field but the key with the server's authoritative values
    pub fn reconcile(&mut self, record: &RemoteBooking) {
        self.trip_id = record.trip_id.clone();
        self.counterpart_id = record.counterpart_id.clone();
        self.traveler_id = record.traveler_id.clone();
        self.details = record.details.clone();
        self.status = record.status;
        self.payment_status = record.payment_status;
        self.payment_due = record.payment_due;
        self.created_at = record.created_at;
        self.updated_at = record.updated_at;
    }

    /// Does the filter select this booking?
    #[must_use]
    pub fn matches(&self, filter: &BookingFilter) -> bool {
        match filter {
            BookingFilter::All => true,
            BookingFilter::Sender(id) => &self.counterpart_id == id,
            BookingFilter::Traveler(id) => self.traveler_id.as_ref() == Some(id),
            BookingFilter::Trip(id) => &self.trip_id == id,
        }
    }
}

impl From<RemoteBooking> for Booking {
    fn from(record: RemoteBooking) -> Self {
        Self {
            key: BookingKey::Remote(record.id),
            trip_id: record.trip_id,
            counterpart_id: record.counterpart_id,
            traveler_id: record.traveler_id,
            details: record.details,
            status: record.status,
            payment_status: record.payment_status,
            payment_due: record.payment_due,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A booking record as the remote service returns it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBooking {
    /// Server-assigned id
    pub id: BookingId,
    /// Trip being booked
    pub trip_id: TripId,
    /// Sender / package request
    pub counterpart_id: ParticipantId,
    /// Traveler owning the trip
    #[serde(default)]
    pub traveler_id: Option<ParticipantId>,
    /// Package being carried
    pub details: PackageDetails,
    /// Delivery status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Payment deadline
    #[serde(default)]
    pub payment_due: Option<DateTime<Utc>>,
    /// Creation time on the server
    pub created_at: DateTime<Utc>,
    /// Last change on the server
    pub updated_at: DateTime<Utc>,
}

/// Create payload sent to the remote service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    /// Trip being booked
    pub trip_id: TripId,
    /// Sender / package request
    pub counterpart_id: ParticipantId,
    /// Package being carried
    pub details: PackageDetails,
}

/// Whose bookings to list
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Role {
    /// Bookings requested by this sender
    Sender(ParticipantId),
    /// Bookings on this traveler's trips
    Traveler(ParticipantId),
}

impl Role {
    /// Does a record belong to this role's view?
    #[must_use]
    pub fn sees(&self, record: &RemoteBooking) -> bool {
        match self {
            Self::Sender(id) => &record.counterpart_id == id,
            Self::Traveler(id) => record.traveler_id.as_ref() == Some(id),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender(id) => write!(f, "sender:{id}"),
            Self::Traveler(id) => write!(f, "traveler:{id}"),
        }
    }
}

/// Read-time view selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BookingFilter {
    /// Everything in the collection
    #[default]
    All,
    /// Bookings requested by a sender
    Sender(ParticipantId),
    /// Bookings on a traveler's trips
    Traveler(ParticipantId),
    /// Bookings against one trip
    Trip(TripId),
}

impl From<&Role> for BookingFilter {
    fn from(role: &Role) -> Self {
        match role {
            Role::Sender(id) => Self::Sender(id.clone()),
            Role::Traveler(id) => Self::Traveler(id.clone()),
        }
    }
}

// ============================================================================
// Pending operations
// ============================================================================

/// What an in-flight mutation is doing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Creating a draft on the server
    Create,
    /// Moving the delivery status
    Status(BookingStatus),
    /// Moving the payment status
    Payment(PaymentStatus),
}

/// A mutation applied optimistically and not yet settled by the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOperation {
    /// Command that started it
    pub command_id: CommandId,
    /// What it does
    pub kind: OperationKind,
    /// Record before the optimistic change (`None` for a create)
    pub previous: Option<Booking>,
}

// ============================================================================
// State
// ============================================================================

/// The booking collection plus in-flight tracking
///
/// Insertion order is kept for stable listing; a draft keeps its position
/// when it is rekeyed by its server id.
#[derive(Clone, Debug, Default)]
pub struct BookingState {
    bookings: HashMap<BookingKey, Booking>,
    order: Vec<BookingKey>,
    pending: HashMap<BookingKey, PendingOperation>,
    /// Draft key → server id of a created booking. One entry per booking
    /// that started as a draft and is still held, dropped with the booking.
    aliases: HashMap<LocalId, BookingId>,
    /// Server id → draft, for ids listed by a load while the draft's create
    /// was still in flight. Dropped when the create settles either way.
    claims: HashMap<BookingId, LocalId>,
    version: u64,
}

impl BookingState {
    /// Creates an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bookings held
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the collection is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Bumped on every accepted change
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Map a key onto the key its booking is held under
    ///
    /// A created draft's key maps to its server key; a server id claimed by
    /// a draft that is still being created maps to the draft.
    #[must_use]
    pub fn resolve(&self, key: &BookingKey) -> BookingKey {
        match key {
            BookingKey::Draft(local) => self
                .aliases
                .get(local)
                .map_or_else(|| key.clone(), |id| BookingKey::Remote(id.clone())),
            BookingKey::Remote(id) => self
                .claims
                .get(id)
                .map_or_else(|| key.clone(), |local| BookingKey::Draft(*local)),
        }
    }

    /// Look up a booking, following draft aliases
    #[must_use]
    pub fn get(&self, key: &BookingKey) -> Option<&Booking> {
        self.bookings.get(&self.resolve(key))
    }

    /// In-flight operation on a booking, following draft aliases
    #[must_use]
    pub fn pending(&self, key: &BookingKey) -> Option<&PendingOperation> {
        self.pending.get(&self.resolve(key))
    }

    /// Number of in-flight operations
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Key of the booking currently settling `command_id`
    #[must_use]
    pub fn key_for_command(&self, command_id: CommandId) -> Option<&BookingKey> {
        self.pending
            .iter()
            .find(|(_, op)| op.command_id == command_id)
            .map(|(key, _)| key)
    }

    /// Bookings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.order.iter().filter_map(|key| self.bookings.get(key))
    }

    /// The active booking on a pairing, if any
    #[must_use]
    pub fn active_for(&self, trip_id: &TripId, counterpart_id: &ParticipantId) -> Option<&Booking> {
        self.iter().find(|b| b.occupies(trip_id, counterpart_id))
    }

    /// Draft whose create is in flight on a pairing, if any
    #[must_use]
    pub fn draft_for(&self, trip_id: &TripId, counterpart_id: &ParticipantId) -> Option<LocalId> {
        match self.active_for(trip_id, counterpart_id)?.key {
            BookingKey::Draft(local) => Some(local),
            BookingKey::Remote(_) => None,
        }
    }

    /// Number of draft keys still mapped to a server key
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Read-only copy of the (filtered) collection
    #[must_use]
    pub fn snapshot(&self, filter: &BookingFilter) -> BookingSnapshot {
        let bookings: Vec<Booking> = self.iter().filter(|b| b.matches(filter)).cloned().collect();
        let in_flight = bookings
            .iter()
            .filter(|b| self.pending.contains_key(&b.key))
            .map(|b| b.key.clone())
            .collect();

        BookingSnapshot {
            version: self.version,
            bookings,
            in_flight,
        }
    }

    // ---- mutation, reducer only ----

    pub(crate) fn touch(&mut self) {
        self.version += 1;
    }

    pub(crate) fn insert(&mut self, booking: Booking) {
        let key = booking.key.clone();
        if self.bookings.insert(key.clone(), booking).is_none() {
            self.order.push(key);
        }
    }

    pub(crate) fn get_mut(&mut self, key: &BookingKey) -> Option<&mut Booking> {
        let key = self.resolve(key);
        self.bookings.get_mut(&key)
    }

    pub(crate) fn remove(&mut self, key: &BookingKey) -> Option<Booking> {
        let removed = self.bookings.remove(key)?;
        self.order.retain(|k| k != key);
        match key {
            BookingKey::Draft(local) => self.claims.retain(|_, claimant| claimant != local),
            BookingKey::Remote(id) => self.aliases.retain(|_, target| target != id),
        }
        Some(removed)
    }

    /// Route a listed server id to the draft that is being created
    pub(crate) fn claim(&mut self, id: BookingId, local: LocalId) {
        self.claims.insert(id, local);
    }

    /// Move a draft to its server key, keeping its position in the listing
    pub(crate) fn rekey(&mut self, local: LocalId, id: BookingId) {
        let from = BookingKey::Draft(local);
        let to = BookingKey::Remote(id.clone());
        self.claims.retain(|_, claimant| *claimant != local);
        if let Some(mut booking) = self.bookings.remove(&from) {
            // A load may have listed the record before the create settled
            if self.bookings.remove(&to).is_some() {
                self.order.retain(|k| *k != to);
            }
            self.aliases.retain(|_, target| *target != id);
            booking.key = to.clone();
            self.bookings.insert(to.clone(), booking);
            if let Some(slot) = self.order.iter_mut().find(|k| **k == from) {
                *slot = to;
            }
        }
        self.aliases.insert(local, id);
    }

    pub(crate) fn begin(&mut self, key: BookingKey, operation: PendingOperation) {
        self.pending.insert(key, operation);
    }

    /// Clear the pending operation for `key` if it belongs to `command_id`
    pub(crate) fn finish(&mut self, key: &BookingKey, command_id: CommandId) -> Option<PendingOperation> {
        let key = self.resolve(key);
        if self.pending.get(&key)?.command_id != command_id {
            return None;
        }
        self.pending.remove(&key)
    }
}

/// What UI surfaces receive: a read-only copy, never a reference into the store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingSnapshot {
    /// Collection version this copy was taken at
    pub version: u64,
    /// Matching bookings in insertion order
    pub bookings: Vec<Booking>,
    /// Keys of the listed bookings that have a mutation in flight
    pub in_flight: Vec<BookingKey>,
}

impl BookingSnapshot {
    /// Number of listed bookings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    /// Whether nothing is listed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Find a listed booking by key
    #[must_use]
    pub fn get(&self, key: &BookingKey) -> Option<&Booking> {
        self.bookings.iter().find(|b| &b.key == key)
    }

    /// Whether a listed booking is still settling
    #[must_use]
    pub fn is_in_flight(&self, key: &BookingKey) -> bool {
        self.in_flight.contains(key)
    }

    /// Same listing and in-flight set, whatever the collection version
    #[must_use]
    pub fn same_view(&self, other: &Self) -> bool {
        self.bookings == other.bookings && self.in_flight == other.in_flight
    }
}
