use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped power measurement for a device. This is the canonical
/// wire payload for both transports: compact JSON with exactly these three
/// fields, timestamp as RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub power: f64,
}

impl Reading {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

pub fn power_topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/{device_id}/power")
}

/// MQTT-style single-level wildcard match: `+` stands for exactly one path
/// segment. Segment counts must agree; no multi-level wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some(pattern), Some(segment)) => {
                if pattern != "+" && pattern != segment {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encode_decode_round_trip() {
        let reading = Reading {
            device_id: "fridge_207".to_string(),
            timestamp: Utc.with_ymd_and_hms(2015, 3, 14, 9, 26, 53).unwrap(),
            power: 142.5,
        };
        let encoded = reading.encode().expect("encode");
        let decoded = Reading::decode(&encoded).expect("decode");
        assert_eq!(decoded, reading);
    }

    #[test]
    fn wire_format_has_rfc3339_timestamp() {
        let reading = Reading {
            device_id: "vacuum_254".to_string(),
            timestamp: Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            power: 0.0,
        };
        let text = String::from_utf8(reading.encode().unwrap()).unwrap();
        assert!(text.contains("\"2015-01-01T00:00:00Z\""), "{text}");
        assert!(text.contains("\"device_id\":\"vacuum_254\""), "{text}");
    }

    #[test]
    fn topic_building() {
        assert_eq!(
            power_topic("home/appliance", "fridge_207"),
            "home/appliance/fridge_207/power"
        );
    }

    #[test]
    fn wildcard_matches_one_segment() {
        let filter = "home/appliance/+/power";
        assert!(topic_matches(filter, "home/appliance/fridge_207/power"));
        assert!(topic_matches(filter, "home/appliance/vacuum_254/power"));
        assert!(!topic_matches(filter, "home/appliance/fridge_207/status/power"));
        assert!(!topic_matches(filter, "home/appliance/fridge_207"));
        assert!(!topic_matches(filter, "office/appliance/fridge_207/power"));
    }

    #[test]
    fn literal_filter_is_exact() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b/d"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }
}
