//! Alert pipeline
//!
//! Feed payloads become `AlertRecord`s, pass the deduplicator once per
//! notification id, and are buffered by the aggregator until a dispatch tick
//! groups them by area.

use crate::logging::ellipse;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod aggregator;
pub mod dedup;

pub use aggregator::{group_by_area, AlertAggregator, AreaGroup};
pub use dedup::AlertDeduplicator;

/// A feed payload that could not be turned into an alert.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed alert payload ({payload}): {source}")]
    Json {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("alert payload has an empty notification id")]
    MissingId,
}

/// Message kind carried in the feed envelope's `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedKind {
    #[serde(rename = "ALERT")]
    Alert,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    #[serde(rename = "type")]
    kind: FeedKind,
    data: FeedAlertData,
}

#[derive(Debug, Deserialize)]
struct FeedAlertData {
    #[serde(rename = "notificationId")]
    notification_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    time: i64,
    #[serde(default)]
    threat: Option<i64>,
    #[serde(default, rename = "isDrill")]
    is_drill: bool,
    #[serde(default)]
    cities: Vec<String>,
}

/// Latest accepted `time`: year 9999.
const MAX_EPOCH_SECS: f64 = 253_402_300_799.0;

/// The feed sends fractional epoch seconds; whole seconds are enough here.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || !(0.0..=MAX_EPOCH_SECS).contains(&secs) {
        return Err(D::Error::custom(format!("time {} is not a valid epoch", secs)));
    }
    Ok(secs.floor() as i64)
}

/// One alert as admitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub kind: FeedKind,
    pub notification_id: String,
    /// Epoch seconds.
    pub occurred_at: i64,
    pub threat_level: Option<i64>,
    pub is_drill: bool,
    pub cities: Vec<String>,
    /// Set once by the dispatch tick; never cleared.
    pub sent: bool,
}

impl AlertRecord {
    pub fn new(notification_id: impl Into<String>, occurred_at: i64, cities: Vec<String>) -> Self {
        Self {
            kind: FeedKind::Alert,
            notification_id: notification_id.into(),
            occurred_at,
            threat_level: None,
            is_drill: false,
            cities,
            sent: false,
        }
    }

    pub fn with_threat(mut self, threat: i64) -> Self {
        self.threat_level = Some(threat);
        self
    }

    pub fn drill(mut self) -> Self {
        self.is_drill = true;
        self
    }

    pub fn with_kind(mut self, kind: FeedKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parse one feed text frame.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let envelope: FeedEnvelope =
            serde_json::from_str(payload).map_err(|source| ParseError::Json {
                payload: ellipse(payload, 200),
                source,
            })?;
        let data = envelope.data;
        if data.notification_id.trim().is_empty() {
            return Err(ParseError::MissingId);
        }
        Ok(Self {
            kind: envelope.kind,
            notification_id: data.notification_id,
            occurred_at: data.time,
            threat_level: data.threat,
            is_drill: data.is_drill,
            cities: data.cities,
            sent: false,
        })
    }

    /// True when the record may reach notification at all.
    pub fn is_actionable(&self) -> bool {
        self.kind == FeedKind::Alert && !self.is_drill
    }

    /// Seconds since the alert occurred, relative to `now`.
    pub fn age(&self, now: i64) -> i64 {
        now.saturating_sub(self.occurred_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feed_alert() {
        let payload = r#"{"type":"ALERT","data":{"notificationId":"aecf1eac-e811","time":1700000000.75,"threat":5,"isDrill":false,"cities":["Alpha","Beta"]}}"#;
        let record = AlertRecord::parse(payload).unwrap();
        assert_eq!(record.kind, FeedKind::Alert);
        assert_eq!(record.notification_id, "aecf1eac-e811");
        assert_eq!(record.occurred_at, 1_700_000_000);
        assert_eq!(record.threat_level, Some(5));
        assert_eq!(record.cities, vec!["Alpha", "Beta"]);
        assert!(!record.sent);
        assert!(record.is_actionable());
    }

    #[test]
    fn threat_is_optional_and_unknown_kinds_are_kept() {
        let payload = r#"{"type":"SYSTEM_MESSAGE","data":{"notificationId":"n1","time":1700000000,"isDrill":false,"cities":[]}}"#;
        let record = AlertRecord::parse(payload).unwrap();
        assert_eq!(record.kind, FeedKind::Other);
        assert_eq!(record.threat_level, None);
        assert!(!record.is_actionable());
    }

    #[test]
    fn drills_are_not_actionable() {
        let record = AlertRecord::new("n1", 0, vec!["Alpha".to_string()]).drill();
        assert!(!record.is_actionable());
    }

    #[test]
    fn malformed_payloads_are_parse_errors() {
        assert!(matches!(AlertRecord::parse("not json"), Err(ParseError::Json { .. })));
        assert!(matches!(
            AlertRecord::parse(r#"{"type":"ALERT","data":{"time":1}}"#),
            Err(ParseError::Json { .. })
        ));
        assert!(matches!(
            AlertRecord::parse(r#"{"type":"ALERT","data":{"notificationId":" ","time":1}}"#),
            Err(ParseError::MissingId)
        ));
    }

    #[test]
    fn out_of_range_times_are_parse_errors() {
        for time in ["-1e300", "1e300", "-5", "1e13"] {
            let payload = format!(
                r#"{{"type":"ALERT","data":{{"notificationId":"x","time":{time},"isDrill":false,"cities":["Alpha"]}}}}"#
            );
            assert!(
                matches!(AlertRecord::parse(&payload), Err(ParseError::Json { .. })),
                "time {time} accepted"
            );
        }
    }

    #[test]
    fn age_saturates() {
        let record = AlertRecord::new("n1", i64::MIN, vec![]);
        assert_eq!(record.age(1_700_000_000), i64::MAX);
    }
}
