//! Environment configuration.

use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::value_objects::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Absent means the in-process change feed.
    pub nats_url: Option<String>,
    pub delivery_fee: Money,
    pub currency: String,
    /// Upper bound on any single persistence call.
    pub store_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let delivery_fee: Decimal = load(&lookup, "DELIVERY_FEE", "5.00")?;
        if delivery_fee.is_sign_negative() && !delivery_fee.is_zero() {
            return Err(ConfigError::Invalid { key: "DELIVERY_FEE", message: "must not be negative".into() });
        }
        Ok(Self {
            port: load(&lookup, "PORT", "8083")?,
            database_url: optional(&lookup, "DATABASE_URL"),
            database_max_connections: load(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?,
            nats_url: optional(&lookup, "NATS_URL"),
            delivery_fee: Money::new(delivery_fee),
            currency: optional(&lookup, "CURRENCY").unwrap_or_else(|| "BRL".to_string()),
            store_timeout: Duration::from_millis(load(&lookup, "STORE_TIMEOUT_MS", "10000")?),
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = optional(lookup, key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid { key, message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let loaded = config(&[]).unwrap();
        assert_eq!(loaded.port, 8083);
        assert!(loaded.database_url.is_none());
        assert_eq!(loaded.delivery_fee, Money::from_cents(500));
        assert_eq!(loaded.currency, "BRL");
        assert_eq!(loaded.store_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_and_errors() {
        let loaded = config(&[("PORT", "9000"), ("DELIVERY_FEE", "7.5"), ("NATS_URL", " ")]).unwrap();
        assert_eq!(loaded.port, 9000);
        assert_eq!(loaded.delivery_fee, Money::from_cents(750));
        assert!(loaded.nats_url.is_none());

        assert!(matches!(config(&[("PORT", "http")]), Err(ConfigError::Invalid { key: "PORT", .. })));
        assert!(config(&[("DELIVERY_FEE", "-1")]).is_err());
    }
}
