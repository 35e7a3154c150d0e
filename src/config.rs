use crate::application::processor::PayoutSettings;
use crate::domain::money::Amount;
use crate::error::AppError;
use std::str::FromStr;
use std::time::Duration;

pub const STRIPE_API_URL: &str = "https://api.stripe.com";

/// Default currency for prize transfers.
pub const PAYOUT_CURRENCY: &str = "usd";

/// Upper bound on a single payment-provider call (seconds).
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// A record left `processing` longer than this is reconciled (seconds).
pub const STALE_PROCESSING_SECS: u64 = 900;

/// Retry sweep cadence when serving (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// Audit entries buffered before new ones are dropped.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub currency: String,
    pub provider_timeout: Duration,
    pub stale_processing_after: Duration,
    pub sweep_interval: Duration,
    pub audit_queue_capacity: usize,
    pub api_port: u16,
    /// Live provider credentials (STRIPE_SECRET_KEY). Absent means sandbox mode.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_url: String,
    /// Starting balance of the sandbox provider, in minor units (SANDBOX_AVAILABLE_BALANCE).
    pub sandbox_available: Amount,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let parsed = |key: &str, default: u64| -> Result<u64, AppError> {
            parse_or(lookup(key), key, default)
        };

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            currency: lookup("PAYOUT_CURRENCY")
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| PAYOUT_CURRENCY.to_string()),
            provider_timeout: Duration::from_secs(parsed(
                "PROVIDER_TIMEOUT_SECS",
                PROVIDER_TIMEOUT_SECS,
            )?),
            stale_processing_after: Duration::from_secs(parsed(
                "STALE_PROCESSING_SECS",
                STALE_PROCESSING_SECS,
            )?),
            sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS)?),
            audit_queue_capacity: parse_or(
                lookup("AUDIT_QUEUE_CAPACITY"),
                "AUDIT_QUEUE_CAPACITY",
                AUDIT_QUEUE_CAPACITY,
            )?,
            api_port: parse_or(lookup("API_PORT"), "API_PORT", 8080)?,
            stripe_secret_key: lookup("STRIPE_SECRET_KEY").filter(|k| !k.trim().is_empty()),
            stripe_api_url: lookup("STRIPE_API_URL").unwrap_or_else(|| STRIPE_API_URL.to_string()),
            sandbox_available: Amount::new(parsed("SANDBOX_AVAILABLE_BALANCE", 0)?),
        })
    }

    pub fn payout_settings(&self) -> PayoutSettings {
        PayoutSettings {
            currency: self.currency.clone(),
            provider_timeout: self.provider_timeout,
            stale_after: chrono::Duration::from_std(self.stale_processing_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(STALE_PROCESSING_SECS as i64)),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, AppError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}"))),
    }
}
