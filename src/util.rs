//! Small shared helpers: millisecond clocks, ISO-8601 conversion, id minting.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rand::Rng;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Millisecond timestamp to RFC 3339 with millisecond precision.
pub fn to_iso(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Parse an ISO-8601 timestamp into epoch milliseconds. Returns `None` for
/// anything that does not parse; callers treat that as "no cursor".
pub fn parse_iso_ms(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Short opaque token for queue task ids.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Board message id: `<ms>-<6 base36 chars>`, unique with high probability
/// within one board.
pub fn message_id(ms: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", ms, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_roundtrip() {
        let ms = 1_700_000_000_123;
        let iso = to_iso(ms);
        assert_eq!(parse_iso_ms(&iso), Some(ms));
    }

    #[test]
    fn test_parse_iso_rejects_garbage() {
        assert_eq!(parse_iso_ms("not-a-date"), None);
        assert_eq!(parse_iso_ms(""), None);
    }

    #[test]
    fn test_message_id_shape() {
        let id = message_id(1234);
        let (ms, suffix) = id.split_once('-').unwrap();
        assert_eq!(ms, "1234");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_short_id_length() {
        assert_eq!(short_id().len(), 8);
    }
}
