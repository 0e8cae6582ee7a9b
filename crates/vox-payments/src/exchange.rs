//! Exchange-rate provider.
//!
//! The ledger keeps USD micros; the transfer provider wants integer minor
//! units of the payout currency. Until a live rate feed is wired in, a
//! fixed rate is used.

use crate::{PaymentError, Result};

/// Default rate: 1 USD = 1,500 NGN = 150,000 kobo.
pub const DEFAULT_MINOR_PER_USD: i64 = 150_000;

/// Converts ledger amounts to provider minor units.
pub trait ExchangeRateProvider: Send + Sync {
    /// Minor units of the payout currency for `micros` of USD, rounded down.
    fn usd_to_minor_units(&self, micros: i64) -> Result<i64>;
}

/// A fixed conversion rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRateExchange {
    minor_per_usd: i64,
}

impl Default for FixedRateExchange {
    fn default() -> Self {
        Self::new(DEFAULT_MINOR_PER_USD)
    }
}

impl FixedRateExchange {
    pub fn new(minor_per_usd: i64) -> Self {
        Self { minor_per_usd }
    }

    pub fn minor_per_usd(&self) -> i64 {
        self.minor_per_usd
    }
}

impl ExchangeRateProvider for FixedRateExchange {
    fn usd_to_minor_units(&self, micros: i64) -> Result<i64> {
        if micros < 0 || self.minor_per_usd <= 0 {
            return Err(PaymentError::InvalidRequest(format!(
                "cannot convert {micros} micros at {} per USD",
                self.minor_per_usd
            )));
        }
        let minor = i128::from(micros) * i128::from(self.minor_per_usd)
            / i128::from(vox_types::MICROS_PER_USD);
        i64::try_from(minor)
            .map_err(|_| PaymentError::InvalidRequest(format!("{micros} micros overflows")))
    }
}
