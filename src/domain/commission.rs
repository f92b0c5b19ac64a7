//! Platform commission on course purchases.
//!
//! The split is computed once, when a payment is confirmed, and stored on the
//! payment. The net share is always derived by subtraction so the two parts
//! add back to the gross exactly.

use super::money::{Amount, Balance};
use crate::error::EngineError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Commission percentage in the inclusive range 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct CommissionRate(Decimal);

impl CommissionRate {
    pub const DEFAULT: Self = Self(dec!(15));

    pub fn new(percent: Decimal) -> Result<Self, EngineError> {
        if percent < Decimal::ZERO || percent > dec!(100) {
            return Err(EngineError::Validation(format!(
                "Commission rate must be between 0 and 100, got {}",
                percent
            )));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> Decimal {
        self.0
    }
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<Decimal> for CommissionRate {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommissionRate> for Decimal {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

impl FromStr for CommissionRate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let percent = Decimal::from_str(s.trim())
            .map_err(|e| EngineError::Validation(format!("Invalid commission rate: {}", e)))?;
        Self::new(percent)
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Result of splitting a gross payment between platform and tutor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub gross: Amount,
    pub commission: Balance,
    pub net: Balance,
}

/// Splits `gross` (minor units) at `rate`.
///
/// `commission = round(gross * rate / 100)` with halves rounded away from
/// zero, and `net = gross - commission`.
pub fn split(gross: i64, rate: CommissionRate) -> Result<CommissionSplit, EngineError> {
    let gross = Amount::new(gross)?;
    let raw = Decimal::from(gross.minor_units()) * rate.percent() / dec!(100);
    let commission = raw
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(EngineError::InvalidAmount(gross.minor_units()))?;

    Ok(CommissionSplit {
        gross,
        commission: Balance::new(commission),
        net: Balance::new(gross.minor_units() - commission),
    })
}
