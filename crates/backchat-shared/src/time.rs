//! Timestamp normalization.
//!
//! Remote records carry activity timestamps either as RFC 3339 strings or as
//! epoch milliseconds (sometimes stringified). Everything is converted to a
//! single `DateTime<Utc>` at ingest so ordering never has to branch on the
//! record's origin.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse an RFC 3339 string or an epoch-milliseconds integer string.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }

    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Like [`parse_timestamp`], but unparsable input maps to the Unix epoch so
/// that malformed history still sorts deterministically.
pub fn parse_timestamp_or_epoch(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Serde adapter for `Option<DateTime<Utc>>` fields that accept any of the
/// timestamp encodings seen on the wire. Serializes as RFC 3339.
pub mod flexible {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            Some(Raw::Float(ms)) => DateTime::from_timestamp_millis(ms as i64)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Raw::Text(s)) => parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Record {
        #[serde(default, with = "flexible", alias = "lastMessageTimestamp")]
        last_message_timestamp: Option<DateTime<Utc>>,
    }

    #[test]
    fn parses_millis_and_rfc3339() {
        let a = parse_timestamp("1700000000000").unwrap();
        let b = parse_timestamp("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_maps_to_epoch() {
        assert!(parse_timestamp("not a date").is_none());
        assert_eq!(parse_timestamp_or_epoch("not a date").timestamp(), 0);
        assert_eq!(parse_timestamp_or_epoch("").timestamp(), 0);
    }

    #[test]
    fn both_field_spellings_normalize() {
        let snake: Record =
            serde_json::from_str(r#"{"last_message_timestamp":"2023-11-14T22:13:20Z"}"#).unwrap();
        let camel: Record =
            serde_json::from_str(r#"{"lastMessageTimestamp":1700000000000}"#).unwrap();
        assert_eq!(snake.last_message_timestamp, camel.last_message_timestamp);

        let missing: Record = serde_json::from_str("{}").unwrap();
        assert!(missing.last_message_timestamp.is_none());
    }
}
