//! Compact duration strings for configs and CLI flags.
//!
//! Accepted forms are an unsigned integer followed by a unit suffix:
//! `ms` (milliseconds), `s`, `m` (minutes), `h`, `D`/`d` (days), `W`/`w` (weeks).
//! A bare `0` is also accepted and means a zero-length duration, which the
//! engine uses to select change-driven (unsampled) series.
//!
//! ```
//! use chrono::Duration;
//! use shared_utils::duration::{format_duration, parse_duration};
//!
//! assert_eq!(parse_duration("15m").unwrap(), Duration::minutes(15));
//! assert_eq!(format_duration(Duration::hours(1)), "1h");
//! ```

use chrono::Duration;
use thiserror::Error;

/// Failure to parse a compact duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    /// Nothing to parse.
    #[error("empty duration")]
    Empty,
    /// The numeric part is missing or not an unsigned integer.
    #[error("invalid amount in duration {0:?}")]
    Amount(String),
    /// The suffix is not a known unit.
    #[error("unknown duration unit {unit:?} in {input:?}")]
    Unit {
        /// Full input.
        input: String,
        /// Offending suffix.
        unit: String,
    },
    /// The value does not fit in a [`chrono::Duration`].
    #[error("duration {0:?} is out of range")]
    Overflow(String),
}

/// Parse `"500ms"`, `"10m"`, `"1h"`, `"1D"`, `"2W"` or `"0"`.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(Duration::zero());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| DurationParseError::Unit {
            input: s.to_string(),
            unit: String::new(),
        })?;
    let (digits, unit) = s.split_at(split);
    let amount: i64 = digits
        .parse()
        .map_err(|_| DurationParseError::Amount(s.to_string()))?;

    let out = match unit {
        "ms" => Duration::try_milliseconds(amount),
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "D" | "d" => Duration::try_days(amount),
        "W" | "w" => Duration::try_weeks(amount),
        _ => {
            return Err(DurationParseError::Unit {
                input: s.to_string(),
                unit: unit.to_string(),
            });
        }
    };
    out.ok_or_else(|| DurationParseError::Overflow(s.to_string()))
}

/// Render a duration using the largest unit that divides it exactly.
///
/// Negative durations are rendered with a leading `-` but cannot be parsed back.
pub fn format_duration(d: Duration) -> String {
    let ms = d.num_milliseconds();
    if ms == 0 {
        return "0".to_string();
    }
    if ms < 0 {
        return format!("-{}", format_duration(-d));
    }

    const UNITS: [(i64, &str); 6] = [
        (7 * 24 * 3_600_000, "W"),
        (24 * 3_600_000, "D"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
        (1, "ms"),
    ];
    for (size, suffix) in UNITS {
        if ms % size == 0 {
            return format!("{}{suffix}", ms / size);
        }
    }
    unreachable!("1ms divides every millisecond count")
}

/// Serde adapter so config structs can hold [`chrono::Duration`] as compact strings.
///
/// Use with `#[serde(with = "shared_utils::duration::compact")]`.
pub mod compact {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use super::{format_duration, parse_duration};

    /// Serialize as a compact string.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    /// Deserialize from a compact string.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::milliseconds(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::seconds(30)));
        assert_eq!(parse_duration("10m"), Ok(Duration::minutes(10)));
        assert_eq!(parse_duration(" 1h "), Ok(Duration::hours(1)));
        assert_eq!(parse_duration("1D"), Ok(Duration::days(1)));
        assert_eq!(parse_duration("2w"), Ok(Duration::weeks(2)));
        assert_eq!(parse_duration("0"), Ok(Duration::zero()));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(
            parse_duration("15"),
            Err(DurationParseError::Unit { .. })
        ));
        assert!(matches!(
            parse_duration("h"),
            Err(DurationParseError::Amount(_))
        ));
        assert!(matches!(
            parse_duration("3y"),
            Err(DurationParseError::Unit { ref unit, .. }) if unit == "y"
        ));
    }

    #[test]
    fn formats_with_largest_exact_unit() {
        assert_eq!(format_duration(Duration::minutes(90)), "90m");
        assert_eq!(format_duration(Duration::minutes(120)), "2h");
        assert_eq!(format_duration(Duration::days(14)), "2W");
        assert_eq!(format_duration(Duration::milliseconds(1500)), "1500ms");
        assert_eq!(format_duration(Duration::zero()), "0");
    }

    #[test]
    fn serde_adapter_reads_toml() {
        #[derive(serde::Deserialize, serde::Serialize)]
        struct Cfg {
            #[serde(with = "compact")]
            every: Duration,
        }
        let cfg: Cfg = toml::from_str(r#"every = "15m""#).unwrap();
        assert_eq!(cfg.every, Duration::minutes(15));
        assert_eq!(toml::to_string(&cfg).unwrap().trim(), r#"every = "15m""#);

        let bad = toml::from_str::<Cfg>(r#"every = "15 minutes""#);
        assert!(bad.is_err());
    }
}
