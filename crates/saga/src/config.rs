use std::time::Duration;

/// Default cap on the units one buy or sell may expand to.
pub const MAX_UNITS_PER_REQUEST: usize = 100;

/// Saga-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Bounded wait for each step response.
    pub step_timeout: Duration,
    /// Share of the unit price credited when selling, in percent.
    pub sell_payout_percent: u32,
    /// Upper bound on the summed quantities of one request.
    pub max_units_per_request: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            sell_payout_percent: 80,
            max_units_per_request: MAX_UNITS_PER_REQUEST,
        }
    }
}

impl SagaConfig {
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_sell_payout_percent(mut self, percent: u32) -> Self {
        self.sell_payout_percent = percent;
        self
    }

    pub fn with_max_units_per_request(mut self, max_units: usize) -> Self {
        self.max_units_per_request = max_units;
        self
    }
}
