use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

pub type Properties = BTreeMap<String, PropertyValue>;

/// A single property value as received from the host pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<PropertyValue>),
    Map(Properties),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => n.as_f64(),
            PropertyValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Number(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Number(value.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(PropertyValue::Number)
            .unwrap_or(PropertyValue::Null)
    }
}

/// The event the host pipeline hands over. Wire field names follow the
/// capture format (`$set`, `$set_once`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Absent ids are replaced with a fresh v4 UUID at transform time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub event: String,
    #[serde(default)]
    pub distinct_id: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(rename = "$set", default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Properties>,
    #[serde(rename = "$set_once", default, skip_serializing_if = "Option::is_none")]
    pub set_once: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> Self {
        Self {
            uuid: None,
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: Properties::new(),
            set: None,
            set_once: None,
            timestamp: None,
            sent_at: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_set(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Size of the event's JSON encoding, used for buffer accounting.
    pub fn serialized_size(&self) -> Result<usize, CoreError> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// Accepts either a single event or a batch array at POST /api/capture.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CaptureOrBatch {
    Single(Box<RawEvent>),
    Batch(Vec<RawEvent>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_capture_format() {
        let raw = r#"{
            "uuid": "0190a4a2-7f4e-7c3a-9a4e-2f0c1d2e3f40",
            "event": "click",
            "distinct_id": "user-1",
            "properties": {"$browser": "Firefox", "count": 3, "nested": {"a": [1, true, null]}},
            "$set": {"email": "a@example.com"},
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let event: RawEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "click");
        assert!(event.uuid.is_some());
        assert_eq!(event.property("$browser"), Some(&PropertyValue::from("Firefox")));
        assert_eq!(event.property("count").and_then(PropertyValue::as_f64), Some(3.0));
        assert!(matches!(event.property("nested"), Some(PropertyValue::Map(_))));
        assert_eq!(
            event.set.as_ref().and_then(|s| s.get("email")),
            Some(&PropertyValue::from("a@example.com"))
        );
        assert!(event.sent_at.is_none());
    }

    #[test]
    fn capture_accepts_single_or_batch() {
        let single: CaptureOrBatch = serde_json::from_str(r#"{"event":"a"}"#).unwrap();
        assert!(matches!(single, CaptureOrBatch::Single(_)));

        let batch: CaptureOrBatch =
            serde_json::from_str(r#"[{"event":"a"},{"event":"b"}]"#).unwrap();
        match batch {
            CaptureOrBatch::Batch(events) => assert_eq!(events.len(), 2),
            CaptureOrBatch::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn serialized_size_tracks_payload_growth() {
        let small = RawEvent::new("click", "u1");
        let large = small.clone().with_property("blob", "x".repeat(1000));
        let small_size = small.serialized_size().unwrap();
        let large_size = large.serialized_size().unwrap();
        assert!(large_size >= small_size + 1000);
    }
}
