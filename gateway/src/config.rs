//! Environment configuration
//!
//! Loaded once at startup. Every variable has a default, and each fallback is
//! logged so a misconfigured deployment is visible in the first lines of output.

use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "dev-only-insecure-jwt-secret-change-me";

#[derive(Error, Debug)]
#[error("Invalid value for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub anchor_enabled: bool,
    pub push_webhook_url: Option<String>,
    pub alert_nearby_radius_m: f64,
    pub ws_channel_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let port = match var("SAFETY_GATEWAY_PORT").or_else(|_| var("PORT")) {
            Ok(raw) => parse("SAFETY_GATEWAY_PORT", &raw)?,
            Err(_) => {
                info!("SAFETY_GATEWAY_PORT not set, using default: 18700");
                18700
            }
        };

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using an insecure development secret");
            DEV_JWT_SECRET.to_string()
        });

        let config = Self {
            port,
            database_url: var("DATABASE_URL").ok(),
            jwt_secret,
            access_token_ttl_secs: try_load("ACCESS_TOKEN_TTL_SECS", "900")?,
            refresh_token_ttl_secs: try_load("REFRESH_TOKEN_TTL_SECS", "1209600")?,
            anchor_enabled: try_load("ANCHOR_ENABLED", "false")?,
            push_webhook_url: var("PUSH_WEBHOOK_URL").ok(),
            alert_nearby_radius_m: try_load("ALERT_NEARBY_RADIUS_M", "2000")?,
            ws_channel_capacity: try_load("WS_CHANNEL_CAPACITY", "256")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.access_token_ttl_secs <= 0 {
            return Err(invalid("ACCESS_TOKEN_TTL_SECS", "must be positive"));
        }
        if self.refresh_token_ttl_secs <= self.access_token_ttl_secs {
            return Err(invalid(
                "REFRESH_TOKEN_TTL_SECS",
                "must be longer than the access token lifetime",
            ));
        }
        if !self.alert_nearby_radius_m.is_finite() || self.alert_nearby_radius_m < 0.0 {
            return Err(invalid("ALERT_NEARBY_RADIUS_M", "must be a non-negative number"));
        }
        if self.ws_channel_capacity == 0 {
            return Err(invalid("WS_CHANNEL_CAPACITY", "must be positive"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 18700,
            database_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 1_209_600,
            anchor_enabled: false,
            push_webhook_url: None,
            alert_nearby_radius_m: 2000.0,
            ws_channel_capacity: 256,
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key)
        .map(|v| v.trim().to_string())
        .map_err(|_| ())
        .and_then(|v| if v.is_empty() { Err(()) } else { Ok(v) })
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_errors_name_the_key() {
        let err = parse::<u16>("SAFETY_GATEWAY_PORT", "not-a-port").unwrap_err();
        assert_eq!(err.key, "SAFETY_GATEWAY_PORT");
        assert!(parse::<bool>("ANCHOR_ENABLED", "true").unwrap());
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let config = Config {
            refresh_token_ttl_secs: 60,
            access_token_ttl_secs: 900,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
