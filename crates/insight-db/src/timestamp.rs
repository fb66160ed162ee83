//! Timestamp column codec.
//!
//! Timestamps are stored as fixed-width RFC 3339 text with microsecond
//! precision so that SQL string comparison orders them chronologically.

use chrono::{DateTime, Utc};

use insight_core::{Error, Result};

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Encode a timestamp for storage.
pub fn encode(ts: DateTime<Utc>) -> String {
    ts.format(FORMAT).to_string()
}

/// Decode a stored timestamp.
pub fn decode(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("invalid timestamp {raw:?}: {e}")))
}

/// Decode a nullable timestamp column.
pub fn decode_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use insight_core::utc_now;

    #[test]
    fn test_encode_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(encode(ts), "2025-03-01T09:05:07.000000Z");
    }

    #[test]
    fn test_round_trip_is_exact() {
        let ts = utc_now();
        let encoded = encode(ts);
        assert_eq!(decode(&encoded).unwrap(), ts);
        assert_eq!(encode(decode(&encoded).unwrap()), encoded);
    }

    #[test]
    fn test_lexicographic_order_is_chronological() {
        let base = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let earlier = base - Duration::microseconds(1);
        let later = base + Duration::milliseconds(1);
        assert!(encode(earlier) < encode(base));
        assert!(encode(base) < encode(later));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("yesterday").is_err());
    }

    #[test]
    fn test_decode_opt() {
        assert_eq!(decode_opt(None).unwrap(), None);
        let ts = utc_now();
        assert_eq!(decode_opt(Some(encode(ts))).unwrap(), Some(ts));
    }
}
