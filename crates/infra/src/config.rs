//! Runtime configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use imobcrm_canalpro::GandalfConfig;
use imobcrm_core::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Background token renewal settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalConfig {
    /// How often the renewal pass runs.
    pub interval: Duration,
    /// Tokens expiring within this window are renewed.
    pub threshold: chrono::Duration,
    /// Consecutive failures after which a credential is left alone.
    pub max_failures: u32,
    /// Credentials renewed per pass.
    pub batch_size: u32,
    pub retry: RetryPolicy,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            threshold: chrono::Duration::minutes(15),
            max_failures: 5,
            batch_size: 100,
            retry: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

/// Refresh beat settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshConfig {
    pub interval: Duration,
    /// Schedules claimed per tick.
    pub batch_size: u32,
    /// Jobs executing at the same time.
    pub max_concurrent: usize,
    /// A run older than this is considered abandoned.
    pub stale_after: chrono::Duration,
    /// How long shutdown waits for dispatched jobs.
    pub drain_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 50,
            max_concurrent: 4,
            stale_after: chrono::Duration::hours(1),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// In-memory stores are used when unset.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_ttl: chrono::Duration,
    /// Base64 32-byte key or passphrase for credential encryption.
    pub credentials_key: String,
    pub canalpro: GandalfConfig,
    pub renewal: RenewalConfig,
    pub refresh: RefreshConfig,
    pub http_bind_addr: String,
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let credentials_key = get("CREDENTIALS_KEY").ok_or(ConfigError::Missing("CREDENTIALS_KEY"))?;

        let mut canalpro = GandalfConfig::default();
        if let Some(url) = get("CANALPRO_API_URL") {
            canalpro.api_url = url;
        }
        if let Some(domain) = get("CANALPRO_DOMAIN") {
            canalpro.domain = domain;
        }
        canalpro.timeout = Duration::from_secs(parse_or(&get, "CANALPRO_TIMEOUT_SECS", 30u64)?);
        canalpro.retry.max_attempts = parse_or(&get, "CANALPRO_MAX_RETRIES", canalpro.retry.max_attempts)?;

        let renewal_defaults = RenewalConfig::default();
        let renewal = RenewalConfig {
            interval: Duration::from_secs(parse_nonzero(
                &get,
                "TOKEN_RENEWAL_INTERVAL_SECS",
                renewal_defaults.interval.as_secs(),
            )?),
            threshold: chrono::Duration::seconds(parse_or(
                &get,
                "TOKEN_RENEWAL_THRESHOLD_SECS",
                renewal_defaults.threshold.num_seconds(),
            )?),
            max_failures: parse_or(&get, "TOKEN_RENEWAL_MAX_FAILURES", renewal_defaults.max_failures)?,
            ..renewal_defaults
        };

        let refresh_defaults = RefreshConfig::default();
        let refresh = RefreshConfig {
            interval: Duration::from_secs(parse_nonzero(
                &get,
                "REFRESH_BEAT_INTERVAL_SECS",
                refresh_defaults.interval.as_secs(),
            )?),
            batch_size: parse_or(&get, "REFRESH_BATCH_SIZE", refresh_defaults.batch_size)?,
            max_concurrent: parse_nonzero(&get, "REFRESH_MAX_CONCURRENT", refresh_defaults.max_concurrent)?,
            stale_after: chrono::Duration::seconds(parse_or(
                &get,
                "REFRESH_STALE_AFTER_SECS",
                refresh_defaults.stale_after.num_seconds(),
            )?),
            drain_timeout: Duration::from_secs(parse_or(
                &get,
                "REFRESH_DRAIN_TIMEOUT_SECS",
                refresh_defaults.drain_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            jwt_secret,
            jwt_ttl: chrono::Duration::minutes(parse_or(&get, "JWT_TTL_MINUTES", 60i64)?),
            credentials_key,
            canalpro,
            renewal,
            refresh,
            http_bind_addr: get("HTTP_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

/// Like `parse_or`, rejecting zero.
fn parse_nonzero<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: get(name).unwrap_or_default(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let cfg = load(&[("JWT_SECRET", "s"), ("CREDENTIALS_KEY", "k")]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.jwt_ttl, chrono::Duration::minutes(60));
        assert_eq!(cfg.http_bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.refresh, RefreshConfig::default());
        assert_eq!(cfg.renewal.max_failures, 5);
        assert_eq!(cfg.canalpro.domain, "www.canalpro.com.br");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("JWT_SECRET", "s"),
            ("CREDENTIALS_KEY", "k"),
            ("DATABASE_URL", "postgres://localhost/crm"),
            ("REFRESH_BATCH_SIZE", "10"),
            ("REFRESH_MAX_CONCURRENT", "2"),
            ("TOKEN_RENEWAL_THRESHOLD_SECS", "120"),
            ("CANALPRO_MAX_RETRIES", "0"),
            ("REFRESH_DRAIN_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/crm"));
        assert_eq!(cfg.refresh.batch_size, 10);
        assert_eq!(cfg.refresh.max_concurrent, 2);
        assert_eq!(cfg.renewal.threshold, chrono::Duration::seconds(120));
        assert_eq!(cfg.canalpro.retry.max_attempts, 0);
        assert_eq!(cfg.refresh.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_secret_is_reported() {
        assert_eq!(
            load(&[("CREDENTIALS_KEY", "k")]).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = load(&[("JWT_SECRET", "s"), ("CREDENTIALS_KEY", "k"), ("REFRESH_BATCH_SIZE", "many")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "REFRESH_BATCH_SIZE", .. }));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for name in ["REFRESH_BEAT_INTERVAL_SECS", "TOKEN_RENEWAL_INTERVAL_SECS", "REFRESH_MAX_CONCURRENT"] {
            let err = load(&[("JWT_SECRET", "s"), ("CREDENTIALS_KEY", "k"), (name, "0")]).unwrap_err();
            assert_eq!(err, ConfigError::Invalid { name, value: "0".into() });
        }
    }
}
