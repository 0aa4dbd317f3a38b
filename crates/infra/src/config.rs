//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | unset (no Postgres) |
//! | `RENTLEDGER_MAX_CONNECTIONS` | `5` |
//! | `RENTLEDGER_ACQUIRE_TIMEOUT_MS` | `30000` |
//! | `RENTLEDGER_LOCK_TIMEOUT_MS` | `5000` (`0` waits forever) |
//! | `RENTLEDGER_RENTAL_QUOTA` | `2` |
//! | `RENTLEDGER_RENTAL_TERM_MONTHS` | `1` |
//! | `RENTLEDGER_STRICT_QUOTA` | `false` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use rentledger_rental::RentalPolicy;
use rentledger_rental::policy::{DEFAULT_QUOTA, DEFAULT_TERM_MONTHS};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for the ledger adapters and the rental engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// `None` lets locking reads wait indefinitely.
    pub lock_timeout: Option<Duration>,
    pub rental_quota: usize,
    pub rental_term_months: u32,
    pub strict_quota: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            lock_timeout: Some(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS)),
            rental_quota: DEFAULT_QUOTA,
            rental_term_months: DEFAULT_TERM_MONTHS,
            strict_quota: false,
        }
    }
}

impl LedgerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let max_connections = parse_or(&lookup, "RENTLEDGER_MAX_CONNECTIONS", defaults.max_connections)?;
        if max_connections == 0 {
            return Err(invalid("RENTLEDGER_MAX_CONNECTIONS", "0", "must be at least 1"));
        }

        let acquire_ms = parse_or(&lookup, "RENTLEDGER_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS)?;
        let lock_ms = parse_or(&lookup, "RENTLEDGER_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS)?;

        let rental_quota = parse_or(&lookup, "RENTLEDGER_RENTAL_QUOTA", defaults.rental_quota)?;
        let rental_term_months =
            parse_or(&lookup, "RENTLEDGER_RENTAL_TERM_MONTHS", defaults.rental_term_months)?;
        if rental_term_months == 0 {
            return Err(invalid("RENTLEDGER_RENTAL_TERM_MONTHS", "0", "must be at least 1"));
        }

        let strict_quota = match lookup("RENTLEDGER_STRICT_QUOTA") {
            None => defaults.strict_quota,
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| invalid("RENTLEDGER_STRICT_QUOTA", &raw, "expected true or false"))?,
        };

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_millis(acquire_ms),
            lock_timeout: (lock_ms > 0).then(|| Duration::from_millis(lock_ms)),
            rental_quota,
            rental_term_months,
            strict_quota,
        })
    }

    pub fn policy(&self) -> RentalPolicy {
        RentalPolicy {
            quota: self.rental_quota,
            term_months: self.rental_term_months,
            strict_quota: self.strict_quota,
        }
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
