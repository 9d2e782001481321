//! Environment settings for nixenv
//!
//! The `settings` section of a configuration document: preferred shell, log
//! level, and the auto-update schedule. Empty strings and a zero interval mean
//! "unset" so that a base configuration can supply the value during a merge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NixEnvError, NixEnvResult};

/// The settings section of a configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Login shell used for scripts (empty = inherit)
    #[serde(default)]
    pub shell: String,

    /// Log level filter (empty = inherit)
    #[serde(default)]
    pub log_level: String,

    /// Whether packages are updated automatically
    #[serde(default)]
    pub auto_update: bool,

    /// How often auto-update runs (zero = inherit)
    #[serde(default, with = "duration_format")]
    pub update_interval: Duration,
}

impl Settings {
    /// Check whether an update interval has been configured
    pub fn has_update_interval(&self) -> bool {
        !self.update_interval.is_zero()
    }
}

/// Parse a human duration such as `24h`, `1h30m`, `7d` or `45s`
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> NixEnvResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Duration::ZERO);
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();

    for ch in input.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let multiplier = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            other => {
                return Err(NixEnvError::Validation(format!(
                    "Invalid duration '{}': unknown unit '{}'",
                    input, other
                )))
            }
        };

        let value: u64 = digits.parse().map_err(|_| {
            NixEnvError::Validation(format!(
                "Invalid duration '{}': missing number before '{}'",
                input, ch
            ))
        })?;
        digits.clear();

        total = value
            .checked_mul(multiplier)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| NixEnvError::Validation(format!("Duration too large: {}", input)))?;
    }

    if !digits.is_empty() {
        return Err(NixEnvError::Validation(format!(
            "Invalid duration '{}': trailing number without unit",
            input
        )));
    }

    Ok(Duration::from_secs(total))
}

/// Format a duration the way `parse_duration` reads it
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// Serde adapter storing durations as human strings
pub mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
