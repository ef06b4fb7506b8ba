//! Application state management.

use htlc_core::{Clock, HtlcError, ManualClock, Payment, PaymentService};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    service: Arc<PaymentService>,
    /// Set when time only moves through `advance_time`
    manual_clock: Option<Arc<ManualClock>>,
}

impl AppState {
    pub fn new(service: Arc<PaymentService>) -> Self {
        Self {
            service,
            manual_clock: None,
        }
    }

    /// State whose clock is simulated; `clock` must be the one the service was built with
    pub fn with_simulated_time(service: Arc<PaymentService>, clock: Arc<ManualClock>) -> Self {
        Self {
            service,
            manual_clock: Some(clock),
        }
    }

    pub fn service(&self) -> &PaymentService {
        &self.service
    }

    pub fn now_secs(&self) -> u64 {
        self.service.clock().now_secs()
    }

    /// Advance simulated time, then refund whatever became due
    pub fn advance_time(&self, seconds: i64) -> Result<Vec<Payment>, HtlcError> {
        let clock = self.manual_clock.as_ref().ok_or_else(|| {
            HtlcError::InvalidInput("simulated time is disabled (set SIMULATED_TIME=1)".to_string())
        })?;
        if seconds < 0 {
            return Err(HtlcError::InvalidInput("time only moves forward".to_string()));
        }
        clock.advance(seconds)?;
        self.service.sweep_now()
    }
}
