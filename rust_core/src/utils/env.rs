//! Environment-variable helpers used by every service's `Config::from_env`.

use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

/// Parse an optional variable, ignoring unset and unparsable values.
pub fn env_parse<T: FromStr>(var_name: &str) -> Option<T> {
    env::var(var_name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse environment variable with default fallback.
///
/// Unset falls back to `default`; set-but-invalid is an error so bad
/// deployments fail at startup instead of running on a silent default.
pub fn parse_or<T: FromStr>(var_name: &str, default: T) -> Result<T> {
    match env::var(var_name) {
        Ok(val) => val.trim().parse().map_err(|_| {
            anyhow!(
                "{} must be a valid {}",
                var_name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

/// String variable with default.
pub fn string_or(var_name: &str, default: &str) -> String {
    env::var(var_name).unwrap_or_else(|_| default.to_string())
}

/// Comma-separated list, trimmed, empties removed.
pub fn list_or(var_name: &str, default: &str) -> Vec<String> {
    split_list(&string_or(var_name, default))
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
