//! Latest block header as reported by `hmy_latestHeader`.

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Staleness allowed before a shard is considered inactive.
pub const DEFAULT_DELAY_TOLERANCE: Duration = Duration::from_secs(60);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// Fields of the latest header the test driver consumes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Header {
    /// Current epoch of the shard
    #[serde(deserialize_with = "lenient_u64")]
    pub epoch: u64,
    /// Block timestamp, `YYYY-MM-DD HH:MM:SS ±ZZZZ ZZZ`
    pub timestamp: String,
}

impl Header {
    /// Parse the header timestamp.
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        parse_header_timestamp(&self.timestamp)
    }
}

/// Parse a header timestamp such as `2020-01-29 02:38:45 +0000 UTC`.
///
/// The trailing zone abbreviation is ignored; the numeric offset is authoritative.
pub fn parse_header_timestamp(timestamp: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = timestamp.split_whitespace().collect();
    let relevant = match parts.len() {
        3 => parts.join(" "),
        4 => parts[..3].join(" "),
        _ => return None,
    };
    DateTime::parse_from_str(&relevant, TIMESTAMP_FORMAT).ok()
}

/// Whether a header produced at `header_time` is fresh at `now`.
///
/// Fresh means strictly less than `tolerance` whole seconds apart, in
/// either direction.
pub fn header_is_fresh(
    header_time: DateTime<FixedOffset>,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    let delta = now.signed_duration_since(header_time).num_seconds().abs();
    delta < tolerance.as_secs() as i64
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("epoch is not a u64: {}", n))),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            }
            .map_err(de::Error::custom)
        }
        other => Err(de::Error::custom(format!("unexpected epoch value: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(timestamp: &str) -> DateTime<FixedOffset> {
        parse_header_timestamp(timestamp).unwrap()
    }

    #[test]
    fn test_parse_go_style_timestamp() {
        let ts = at("2020-01-29 02:38:45 +0000 UTC");
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 1, 29, 2, 38, 45).unwrap());
    }

    #[test]
    fn test_parse_respects_offset() {
        let ts = at("2020-01-29 10:38:45 +0800 CST");
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 1, 29, 2, 38, 45).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_header_timestamp("yesterday").is_none());
        assert!(parse_header_timestamp("").is_none());
    }

    #[test]
    fn test_freshness_boundary() {
        let header = at("2020-01-29 02:38:45 +0000 UTC");
        let tolerance = Duration::from_secs(60);

        let stale = Utc.with_ymd_and_hms(2020, 1, 29, 2, 39, 45).unwrap();
        assert!(!header_is_fresh(header, stale, tolerance));

        let almost = Utc.with_ymd_and_hms(2020, 1, 29, 2, 39, 44).unwrap();
        assert!(header_is_fresh(header, almost, tolerance));
    }

    #[test]
    fn test_freshness_header_ahead_of_clock() {
        let header = at("2020-01-29 02:38:45 +0000 UTC");
        let behind = Utc.with_ymd_and_hms(2020, 1, 29, 2, 37, 45).unwrap();
        assert!(!header_is_fresh(header, behind, Duration::from_secs(60)));
        assert!(header_is_fresh(header, behind, Duration::from_secs(61)));
    }

    #[test]
    fn test_header_epoch_forms() {
        let h: Header =
            serde_json::from_str(r#"{"epoch": 7, "timestamp": "2020-01-29 02:38:45 +0000 UTC"}"#)
                .unwrap();
        assert_eq!(h.epoch, 7);
        let h: Header =
            serde_json::from_str(r#"{"epoch": "0x10", "timestamp": "x"}"#).unwrap();
        assert_eq!(h.epoch, 16);
        assert!(serde_json::from_str::<Header>(r#"{"epoch": null, "timestamp": "x"}"#).is_err());
    }
}
