//! Engine configuration, read from `PAYFLOW_*` environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PAYFLOW_FUTURE_DATE_DAYS` | 30 |
//! | `PAYFLOW_DUPLICATE_WINDOW_DAYS` | 30 |
//! | `PAYFLOW_TIER_ONE_LIMIT` | 50000 |
//! | `PAYFLOW_TIER_TWO_LIMIT` | 500000 |
//! | `PAYFLOW_NUMBER_RETRY_ATTEMPTS` | 5 |
//! | `PAYFLOW_NUMBER_RETRY_BASE_MS` | 10 |
//! | `PAYFLOW_LOCK_TIMEOUT_MS` | 5000 |
//! | `DATABASE_URL` | unset (in-memory store) |

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use payflow_approvals::DefaultTiers;
use payflow_validation::ValidationRules;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub future_date_days: u64,
    pub duplicate_window_days: u64,
    pub tier_one_limit: f64,
    pub tier_two_limit: f64,
    pub number_retry_attempts: u32,
    pub number_retry_base_ms: u64,
    pub lock_timeout_ms: u64,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let tiers = DefaultTiers::default();
        let rules = ValidationRules::default();
        Self {
            future_date_days: rules.future_date_days,
            duplicate_window_days: rules.duplicate_window_days,
            tier_one_limit: tiers.tier_one_limit,
            tier_two_limit: tiers.tier_two_limit,
            number_retry_attempts: 5,
            number_retry_base_ms: 10,
            lock_timeout_ms: 5_000,
            database_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            future_date_days: parse(&get, "PAYFLOW_FUTURE_DATE_DAYS", defaults.future_date_days)?,
            duplicate_window_days: parse(
                &get,
                "PAYFLOW_DUPLICATE_WINDOW_DAYS",
                defaults.duplicate_window_days,
            )?,
            tier_one_limit: parse(&get, "PAYFLOW_TIER_ONE_LIMIT", defaults.tier_one_limit)?,
            tier_two_limit: parse(&get, "PAYFLOW_TIER_TWO_LIMIT", defaults.tier_two_limit)?,
            number_retry_attempts: parse(
                &get,
                "PAYFLOW_NUMBER_RETRY_ATTEMPTS",
                defaults.number_retry_attempts,
            )?,
            number_retry_base_ms: parse(
                &get,
                "PAYFLOW_NUMBER_RETRY_BASE_MS",
                defaults.number_retry_base_ms,
            )?,
            lock_timeout_ms: parse(&get, "PAYFLOW_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            database_url: get("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(self.tier_one_limit > 0.0 && self.tier_two_limit > self.tier_one_limit) {
            return Err(ConfigError::Invalid {
                var: "PAYFLOW_TIER_TWO_LIMIT",
                value: self.tier_two_limit.to_string(),
                reason: format!(
                    "tier limits must satisfy 0 < tier one ({}) < tier two",
                    self.tier_one_limit
                ),
            });
        }
        if self.number_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "PAYFLOW_NUMBER_RETRY_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        Ok(())
    }

    pub fn tiers(&self) -> DefaultTiers {
        DefaultTiers {
            tier_one_limit: self.tier_one_limit,
            tier_two_limit: self.tier_two_limit,
        }
    }

    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            future_date_days: self.future_date_days,
            duplicate_window_days: self.duplicate_window_days,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn number_retry_base(&self) -> Duration {
        Duration::from_millis(self.number_retry_base_ms)
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
