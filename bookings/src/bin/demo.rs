//! Booking lifecycle walkthrough against the in-memory remote service.
//!
//! Two surfaces (the sender's dashboard and the traveler's dashboard) watch
//! the same store while a booking is requested, confirmed and paid, and a
//! failed cancellation is rolled back.
//!
//! Configuration comes from the environment (and `.env`), see
//! `BookingConfig::from_env`.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripcarry_bookings::mocks::{InMemoryBookingService, Operation};
use tripcarry_bookings::{
    BookingConfig, BookingFilter, BookingStatus, BookingStore, PackageDetails, ParticipantId,
    PaymentStatus, Role, ServiceError,
};
use tripcarry_core::environment::SystemClock;

const SENDER: &str = "sender@example.com";
const TRAVELER: &str = "traveler@example.com";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let config = BookingConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        remote_timeout = ?config.remote_timeout,
        latency = ?config.simulated_latency,
        "Starting booking lifecycle demo"
    );

    let remote = InMemoryBookingService::new(Arc::new(SystemClock))
        .with_latency(config.simulated_latency);
    remote.assign_traveler("T1", TRAVELER);

    let store = BookingStore::from_config(&config, Arc::new(remote.clone()));

    let sender_view = store
        .subscribe_with(
            BookingFilter::Sender(ParticipantId::from(SENDER)),
            |snapshot| {
                for booking in &snapshot.bookings {
                    let marker = if snapshot.is_in_flight(&booking.key) { " (saving)" } else { "" };
                    info!(
                        surface = "sender",
                        key = %booking.key,
                        status = %booking.status,
                        payment = %booking.payment_status,
                        "{}{marker}",
                        booking.trip_id
                    );
                }
            },
        )
        .await;
    let traveler_view = store
        .subscribe_with(
            BookingFilter::Traveler(ParticipantId::from(TRAVELER)),
            |snapshot| info!(surface = "traveler", bookings = snapshot.len(), version = snapshot.version, "Traveler dashboard refreshed"),
        )
        .await;

    // Sender books the trip
    let booking = store
        .request_booking("T1", SENDER, PackageDetails::new("small", "two paperback books"))
        .await?
        .settled()
        .await?;
    info!(key = %booking.key, "Booking created");

    // A second request on the same pairing is refused up front
    if let Err(error) = store
        .request_booking("T1", SENDER, PackageDetails::new("small", "again"))
        .await
    {
        warn!(%error, "Duplicate request rejected");
    }

    // Traveler accepts
    let confirmed = store
        .transition_status(booking.key.clone(), BookingStatus::Confirmed)
        .await?
        .settled()
        .await?;
    info!(payment_due = ?confirmed.payment_due, "Booking confirmed");

    // Sender pays
    store
        .transition_payment_status(booking.key.clone(), PaymentStatus::Paid)
        .await?
        .settled()
        .await?;

    // The server drops the cancellation; the store rolls it back
    remote.fail_next(
        Operation::UpdateStatus,
        ServiceError::Http {
            status: 503,
            message: "service unavailable".to_string(),
        },
    );
    let cancel = store
        .transition_status(booking.key.clone(), BookingStatus::Cancelled)
        .await?;
    if let Err(error) = cancel.settled().await {
        warn!(%error, "Cancellation rolled back");
    }

    // Traveler's dashboard hydrates from the server
    let listed = store
        .load_for_role(Role::Traveler(ParticipantId::from(TRAVELER)))
        .await?
        .settled()
        .await?;
    info!(bookings = listed.len(), "Traveler bookings loaded");

    let final_view = store.snapshot(&BookingFilter::All).await;
    for booking in &final_view.bookings {
        info!(
            key = %booking.key,
            status = %booking.status,
            payment = %booking.payment_status,
            "Final state"
        );
    }

    sender_view.unsubscribe().await;
    traveler_view.unsubscribe().await;
    store.shutdown(config.shutdown_timeout).await?;
    info!(remote_calls = remote.calls().len(), "Demo finished");

    Ok(())
}
