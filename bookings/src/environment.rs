//! Dependencies injected into the booking reducer.

use crate::service::BookingService;
use crate::settlement::SettlementRegistry;
use std::sync::Arc;
use tripcarry_core::environment::{Clock, SystemClock};

/// Environment for the booking reducer
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Remote source of truth
    pub service: Arc<dyn BookingService>,
    /// Clock for optimistic timestamps
    pub clock: Arc<dyn Clock>,
    /// Callers waiting for their command's result
    pub settlements: SettlementRegistry,
}

impl BookingEnvironment {
    /// Creates a new `BookingEnvironment`
    #[must_use]
    pub fn new(service: Arc<dyn BookingService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            clock,
            settlements: SettlementRegistry::new(),
        }
    }

    /// Environment backed by the system clock
    #[must_use]
    pub fn live(service: Arc<dyn BookingService>) -> Self {
        Self::new(service, Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for BookingEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingEnvironment")
            .field("settlements", &self.settlements)
            .finish_non_exhaustive()
    }
}
