use crate::domain::commission::CommissionRate;
use crate::domain::installment::InstallmentPolicy;
use crate::domain::money::Amount;
use crate::error::{EngineError, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MINIMUM_PAYOUT: Amount = Amount::from_static(5_000);

/// Policy constants for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub commission_rate: CommissionRate,
    pub installments: InstallmentPolicy,
    pub minimum_payout: Amount,
    pub sweep_interval: Duration,
    /// Upper bound on every individual store call.
    pub operation_timeout: Duration,
    /// Upper bound on a gateway verification call.
    pub gateway_timeout: Duration,
    /// Recipient for admin-facing notifications such as payout requests.
    pub admin_recipient: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_rate: CommissionRate::DEFAULT,
            installments: InstallmentPolicy::default(),
            minimum_payout: DEFAULT_MINIMUM_PAYOUT,
            sweep_interval: Duration::from_secs(6 * 60 * 60),
            operation_timeout: Duration::from_secs(3),
            gateway_timeout: Duration::from_secs(5),
            admin_recipient: "admin".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads overrides from the environment (and `.env` if present). Unset
    /// variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(rate) = lookup("COURSEPAY_COMMISSION_RATE") {
            config.commission_rate = CommissionRate::from_str(&rate)
                .map_err(|e| EngineError::Config(format!("COURSEPAY_COMMISSION_RATE: {}", e)))?;
        }
        if let Some(count) = parse::<u32>(&lookup, "COURSEPAY_TOTAL_INSTALLMENTS")? {
            if count == 0 {
                return Err(EngineError::Config(
                    "COURSEPAY_TOTAL_INSTALLMENTS must be at least 1".to_string(),
                ));
            }
            config.installments.total_installments = count;
        }
        if let Some(days) = parse::<i64>(&lookup, "COURSEPAY_INSTALLMENT_INTERVAL_DAYS")? {
            config.installments.interval = chrono::Duration::try_days(days)
                .filter(|d| *d > chrono::Duration::zero())
                .ok_or_else(|| {
                    EngineError::Config(
                        "COURSEPAY_INSTALLMENT_INTERVAL_DAYS must be a positive number of days"
                            .to_string(),
                    )
                })?;
        }
        if let Some(minimum) = parse::<i64>(&lookup, "COURSEPAY_MINIMUM_PAYOUT")? {
            config.minimum_payout = Amount::new(minimum)
                .map_err(|e| EngineError::Config(format!("COURSEPAY_MINIMUM_PAYOUT: {}", e)))?;
        }
        if let Some(secs) = parse::<u64>(&lookup, "COURSEPAY_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = parse::<u64>(&lookup, "COURSEPAY_OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse::<u64>(&lookup, "COURSEPAY_GATEWAY_TIMEOUT_MS")? {
            config.gateway_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(admin) = lookup("COURSEPAY_ADMIN_RECIPIENT") {
            let admin = admin.trim();
            if !admin.is_empty() {
                config.admin_recipient = admin.to_string();
            }
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| EngineError::Config(format!("{} is invalid: {}", key, e)))
        })
        .transpose()
}
