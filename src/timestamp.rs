// Copyright 2025 Flowsentry Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Accepts numeric-or-string timestamps on input, normalizes to
//! seconds-since-epoch internally, and always emits a single canonical
//! millisecond-precision ISO-8601 UTC string with a `Z` suffix.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A point in time, stored internally as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_seconds(seconds: f64) -> Self {
        Timestamp(seconds)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0
    }

    /// Current wall-clock time. Used once per alert event and once for
    /// latency measurement — the pipeline otherwise has no clock dependency.
    pub fn now() -> Self {
        let now = Utc::now();
        Timestamp(now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1e9)
    }

    pub fn parse_value(value: &serde_json::Value) -> Result<Self, TimestampError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Timestamp)
                .ok_or_else(|| TimestampError(format!("non-finite timestamp: {n}"))),
            serde_json::Value::String(s) => Self::parse_str(s),
            other => Err(TimestampError(format!(
                "unsupported timestamp type: {other}"
            ))),
        }
    }

    fn parse_str(raw: &str) -> Result<Self, TimestampError> {
        if let Ok(numeric) = raw.parse::<f64>() {
            return Ok(Timestamp(numeric));
        }
        let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
        let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
            .map_err(|_| TimestampError(format!("cannot parse timestamp: {raw}")))?;
        let dt = naive.and_utc();
        let seconds = dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9;
        Ok(Timestamp(seconds))
    }

    /// Millisecond-precision UTC ISO-8601 with trailing `Z`, e.g.
    /// `"2024-01-01T00:00:00.000Z"`.
    pub fn to_iso_millis(&self) -> String {
        let secs = self.0.floor() as i64;
        let nanos = ((self.0 - secs as f64) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
        let dt = DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso_millis())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TimestampError(String);

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Timestamp::parse_value(&value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_iso_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_round_trips_to_millis() {
        let ts = Timestamp::from_seconds(1_700_000_000.25);
        assert_eq!(ts.to_iso_millis(), "2023-11-14T22:13:20.250Z");
    }

    #[test]
    fn parses_iso_with_and_without_z() {
        let with_z = Timestamp::parse_value(&serde_json::json!("2024-01-01T00:00:00.500Z")).unwrap();
        let without_z = Timestamp::parse_value(&serde_json::json!("2024-01-01T00:00:00.500")).unwrap();
        assert!((with_z.as_seconds() - without_z.as_seconds()).abs() < 1e-6);
    }

    #[test]
    fn parse_then_format_is_idempotent_to_millis() {
        let original = "2024-03-05T12:34:56.789Z";
        let ts = Timestamp::parse_value(&serde_json::json!(original)).unwrap();
        assert_eq!(ts.to_iso_millis(), original);
    }

    #[test]
    fn numeric_seconds_parse() {
        let ts = Timestamp::parse_value(&serde_json::json!(1_700_000_000)).unwrap();
        assert_eq!(ts.as_seconds(), 1_700_000_000.0);
    }

    #[test]
    fn rejects_unsupported_types() {
        assert!(Timestamp::parse_value(&serde_json::json!(null)).is_err());
        assert!(Timestamp::parse_value(&serde_json::json!(["bad"])).is_err());
    }
}
