//! Serialization utilities for common data types
//!
//! Durations are written as integer milliseconds. When reading, both the
//! integer form and a human-friendly string with a unit suffix (`"250ms"`,
//! `"1.5s"`, `"5m"`, `"2h"`) are accepted so hand-written TOML policies stay
//! readable.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Either representation a duration may take in a config file.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            Self::Millis(ms) => Ok(Duration::from_millis(ms)),
            Self::Text(text) => parse_duration(&text),
        }
    }
}

/// Parse a duration literal such as `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
///
/// A bare number is read as milliseconds.
///
/// # Errors
/// Returns a description of the problem when the number or unit is invalid.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    let (number, scale) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (trimmed, 0.001)
    };

    let value: f64 =
        number.trim().parse().map_err(|_| format!("invalid duration literal '{input}'"))?;
    Duration::try_from_secs_f64(value * scale)
        .map_err(|e| format!("invalid duration literal '{input}': {e}"))
}

/// Custom serialization module for Duration as milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use shipyard_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serde serialization result type
    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) or a suffixed string into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawDuration::deserialize(deserializer)?.into_duration().map_err(serde::de::Error::custom)
    }
}

/// Same as [`duration_millis`] for optional durations.
///
/// Pair with `#[serde(default)]` so a missing field reads as `None`.
pub mod option_duration_millis {
    use super::*;

    /// Serde serialization result type
    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize `Some(duration)` as milliseconds and `None` as null
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer
                .serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional millisecond or suffixed-string duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
