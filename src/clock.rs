//! Clock positions and since specifications.
//!
//! Every watched root carries its own monotonic tick counter. A
//! `ClockPosition` pairs a tick with the wall time at which it was minted;
//! its string form (`c:<wall>:<ticks>`) is handed to clients so that a later
//! query can resume exactly where the previous one left off.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A monotonic coordinate within one root's lifetime.
///
/// `ticks` never decreases while the root is alive; `wall_time` is the
/// observation wall clock in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockPosition {
    pub ticks: u64,
    pub wall_time: i64,
}

impl ClockPosition {
    pub fn new(ticks: u64, wall_time: i64) -> Self {
        Self { ticks, wall_time }
    }

    /// Render the canonical clock string. Pure function of the position.
    pub fn to_clock_string(&self) -> String {
        format!("c:{}:{}", self.wall_time, self.ticks)
    }

    pub fn parse_clock_string(s: &str) -> Result<Self, ClockSpecParseError> {
        let rest = s
            .strip_prefix("c:")
            .ok_or_else(|| ClockSpecParseError::BadClockString(s.to_string()))?;
        let mut parts = rest.splitn(2, ':');
        let wall = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(|| ClockSpecParseError::BadClockString(s.to_string()))?;
        let ticks = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| ClockSpecParseError::BadClockString(s.to_string()))?;
        Ok(Self {
            ticks,
            wall_time: wall,
        })
    }
}

/// A client-supplied reference point for "changed since" queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSpec {
    /// An absolute position previously handed out by this root.
    Clock(ClockPosition),
    /// "N seconds before now", resolved at evaluation time.
    Relative { seconds: u64 },
}

#[derive(Error, Debug)]
pub enum ClockSpecParseError {
    #[error("invalid clock string: {0:?}")]
    BadClockString(String),
    #[error("invalid since expression: {0:?}")]
    BadSince(String),
}

impl ClockSpec {
    /// Parse a since specification from its JSON form.
    ///
    /// Accepted shapes: a clock string (`"c:<wall>:<ticks>"`), a
    /// non-negative integer (seconds ago), or a duration word such as
    /// `"30s"`, `"5m"`, `"2h"`, `"1d"`.
    pub fn parse(value: &serde_json::Value) -> Result<Self, ClockSpecParseError> {
        if let Some(n) = value.as_u64() {
            return Ok(ClockSpec::Relative { seconds: n });
        }
        let Some(s) = value.as_str() else {
            return Err(ClockSpecParseError::BadSince(value.to_string()));
        };
        if s.starts_with("c:") {
            return Ok(ClockSpec::Clock(ClockPosition::parse_clock_string(s)?));
        }
        Self::parse_relative(s)
    }

    fn parse_relative(s: &str) -> Result<Self, ClockSpecParseError> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(ClockSpec::Relative { seconds: n });
        }
        let (digits, unit) = s.split_at(s.len().saturating_sub(1));
        let n: u64 = digits
            .parse()
            .map_err(|_| ClockSpecParseError::BadSince(s.to_string()))?;
        let seconds = match unit {
            "s" => n,
            "m" => n * 60,
            "h" => n * 3600,
            "d" => n * 86400,
            _ => return Err(ClockSpecParseError::BadSince(s.to_string())),
        };
        Ok(ClockSpec::Relative { seconds })
    }

    /// The wire form: clock specs serialize to their clock string, relative
    /// specs to their second count.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClockSpec::Clock(pos) => serde_json::Value::String(pos.to_clock_string()),
            ClockSpec::Relative { seconds } => serde_json::Value::from(*seconds),
        }
    }

    pub fn as_clock(&self) -> Option<&ClockPosition> {
        match self {
            ClockSpec::Clock(pos) => Some(pos),
            ClockSpec::Relative { .. } => None,
        }
    }
}

/// Current wall time in whole seconds since the epoch.
pub fn wall_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_string_roundtrip() {
        let pos = ClockPosition::new(42, 1700000000);
        let s = pos.to_clock_string();
        assert_eq!(s, "c:1700000000:42");
        assert_eq!(ClockPosition::parse_clock_string(&s).unwrap(), pos);
    }

    #[test]
    fn clock_string_is_pure() {
        let a = ClockPosition::new(7, 99);
        let b = ClockPosition::new(7, 99);
        assert_eq!(a.to_clock_string(), b.to_clock_string());
    }

    #[test]
    fn parse_clock_spec_from_string() {
        let spec = ClockSpec::parse(&serde_json::json!("c:1700000000:17")).unwrap();
        assert_eq!(spec, ClockSpec::Clock(ClockPosition::new(17, 1700000000)));
    }

    #[test]
    fn parse_relative_forms() {
        assert_eq!(
            ClockSpec::parse(&serde_json::json!(30)).unwrap(),
            ClockSpec::Relative { seconds: 30 }
        );
        assert_eq!(
            ClockSpec::parse(&serde_json::json!("5m")).unwrap(),
            ClockSpec::Relative { seconds: 300 }
        );
        assert_eq!(
            ClockSpec::parse(&serde_json::json!("2h")).unwrap(),
            ClockSpec::Relative { seconds: 7200 }
        );
        assert_eq!(
            ClockSpec::parse(&serde_json::json!("1d")).unwrap(),
            ClockSpec::Relative { seconds: 86400 }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ClockSpec::parse(&serde_json::json!("yesterday")).is_err());
        assert!(ClockSpec::parse(&serde_json::json!({"clock": 1})).is_err());
        assert!(ClockSpec::parse(&serde_json::json!("c:nope")).is_err());
    }
}
