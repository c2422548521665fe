//! Configuration management for the booking client.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tripcarry_runtime::StoreConfig;

/// Booking client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Deadline for each remote call; `None` leaves calls unbounded
    pub remote_timeout: Option<Duration>,
    /// How far a subscriber may fall behind before it skips to newer snapshots
    pub notification_capacity: usize,
    /// How long shutdown waits for in-flight remote calls
    pub shutdown_timeout: Duration,
    /// Latency of the in-memory remote used by the demo
    pub simulated_latency: Duration,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Some(Duration::from_secs(10)),
            notification_capacity: 256,
            shutdown_timeout: Duration::from_secs(30),
            simulated_latency: Duration::from_millis(150),
            log_filter: "tripcarry_bookings=info,tripcarry_runtime=info".to_string(),
        }
    }
}

impl BookingConfig {
    /// Load configuration from the process environment
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TRIPCARRY_REMOTE_TIMEOUT_MS` | `10000` (`0` disables the deadline) |
    /// | `TRIPCARRY_NOTIFICATION_CAPACITY` | `256` |
    /// | `TRIPCARRY_SHUTDOWN_TIMEOUT_SECS` | `30` |
    /// | `TRIPCARRY_SIMULATED_LATENCY_MS` | `150` |
    /// | `RUST_LOG` | `tripcarry_bookings=info,tripcarry_runtime=info` |
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            remote_timeout: match number("TRIPCARRY_REMOTE_TIMEOUT_MS") {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.remote_timeout,
            },
            notification_capacity: lookup("TRIPCARRY_NOTIFICATION_CAPACITY")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.notification_capacity),
            shutdown_timeout: number("TRIPCARRY_SHUTDOWN_TIMEOUT_SECS")
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
            simulated_latency: number("TRIPCARRY_SIMULATED_LATENCY_MS")
                .map_or(defaults.simulated_latency, Duration::from_millis),
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// Runtime settings derived from this configuration
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_notification_capacity(self.notification_capacity)
            .with_shutdown_timeout(self.shutdown_timeout)
    }
}
