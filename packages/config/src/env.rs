// ABOUTME: Typed readers for REELBOX_* environment variables
// ABOUTME: Blank values count as unset; bad numbers fall back to defaults with a warning

use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

/// Trimmed value of `name`; unset and whitespace-only are both `None`
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `name`, or the older `alias` it replaced when only that one is set
pub fn env_string_or_alias(name: &str, alias: &str) -> Option<String> {
    env_string(name).or_else(|| {
        let value = env_string(alias)?;
        debug!(alias, preferred = name, "Reading setting from legacy variable");
        Some(value)
    })
}

/// Parse `name`, keeping `default` when unset or unparseable
pub fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    env_checked(name, default, |_| true)
}

/// Parse `name` and keep it only if `accept` allows it
pub fn env_checked<T, F>(name: &str, default: T, accept: F) -> T
where
    T: FromStr + Display,
    F: Fn(&T) -> bool,
{
    let Some(raw) = env_string(name) else {
        return default;
    };

    match raw.parse::<T>() {
        Ok(value) if accept(&value) => value,
        Ok(_) => {
            warn!(variable = name, value = %raw, default = %default, "Out-of-range setting ignored");
            default
        }
        Err(_) => {
            warn!(variable = name, value = %raw, default = %default, "Unparseable setting ignored");
            default
        }
    }
}
