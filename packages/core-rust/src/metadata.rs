//! Per-message metadata extracted by brokers.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Header carrying the payload media type. Matched case-insensitively.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Broker-independent metadata of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Broker-assigned (or generated) message id.
    pub id: String,
    /// Message timestamp, milliseconds since Unix epoch.
    pub timestamp_millis: u64,
    /// Topic, queue or stream the message was received from.
    pub topic: String,
}

/// Returns the `content-type` header value, matching the key case-insensitively.
///
/// Falls back to an empty string when no such header exists.
#[must_use]
pub fn content_type(headers: &HashMap<String, String>) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE_HEADER))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

/// Current wall-clock time in milliseconds since Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        assert_eq!(content_type(&headers), "application/json");

        let mut headers = HashMap::new();
        headers.insert("CONTENT-TYPE".to_string(), "text/plain".to_string());
        assert_eq!(content_type(&headers), "text/plain");
    }

    #[test]
    fn content_type_defaults_to_empty() {
        let mut headers = HashMap::new();
        headers.insert("x-trace".to_string(), "abc".to_string());
        assert_eq!(content_type(&headers), "");
        assert_eq!(content_type(&HashMap::new()), "");
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
