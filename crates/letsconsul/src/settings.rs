//! Runtime settings resolved once at startup.
//!
//! Each setting has exactly two declared sources: a process environment
//! variable, and a key under the namespace prefix in the coordination
//! store. The environment wins when set; deployments are expected to use
//! one mechanism or the other. There is no steady-state re-read — a
//! changed interval takes effect on the next restart.

use std::time::Duration;

use letsconsul_store::{KvStore, StoreError};

/// Settings the scheduler and supervisor are built from.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Service name for the registry entry.
    pub service: String,
    /// Certificate age past which a record is renewed.
    pub renew_interval: Duration,
    /// Cadence of the reload/renewal pass.
    pub reload_interval: Duration,
}

/// A missing or malformed setting. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't fetch '{key}' key")]
    MissingKey { key: String },

    #[error("invalid value for '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Settings {
    pub async fn resolve(store: &dyn KvStore, prefix: &str) -> Result<Self, ConfigError> {
        let service = resolve_raw(store, prefix, "service", "LETSCONSUL_SERVICE").await?;
        let renew_interval =
            resolve_interval(store, prefix, "renew_interval", "LETSCONSUL_RENEW_INTERVAL").await?;
        let reload_interval = resolve_interval(
            store,
            prefix,
            "reload_interval",
            "LETSCONSUL_RELOAD_INTERVAL",
        )
        .await?;
        Ok(Self {
            service,
            renew_interval,
            reload_interval,
        })
    }
}

async fn resolve_raw(
    store: &dyn KvStore,
    prefix: &str,
    key: &str,
    env_var: &str,
) -> Result<String, ConfigError> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(value);
    }
    let full_key = format!("{prefix}/{key}");
    let bytes = store
        .get_value(&full_key)
        .await?
        .ok_or(ConfigError::MissingKey {
            key: full_key.clone(),
        })?;
    String::from_utf8(bytes).map_err(|e| ConfigError::Invalid {
        name: full_key,
        reason: e.to_string(),
    })
}

async fn resolve_interval(
    store: &dyn KvStore,
    prefix: &str,
    key: &str,
    env_var: &str,
) -> Result<Duration, ConfigError> {
    let raw = resolve_raw(store, prefix, key, env_var).await?;
    let duration = parse_duration(&raw).map_err(|reason| ConfigError::Invalid {
        name: key.to_string(),
        reason,
    })?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            name: key.to_string(),
            reason: "interval must be positive".to_string(),
        });
    }
    Ok(duration)
}

/// Parse a duration string of number+unit terms: `"24h"`, `"1h30m"`,
/// `"90s"`, `"500ms"`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{s}'"))?;
        if digits == 0 {
            return Err(format!("expected a number in '{s}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("bad number in '{s}'"))?;
        rest = &rest[digits..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("unknown unit '{unit}' in '{s}'")),
        };
    }
    Ok(total)
}
