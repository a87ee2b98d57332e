use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for all WebSocket communication, in both directions.
///
/// `data` is opaque to the hub: producers put whatever structure they
/// like there and consumers interpret it by `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    /// Advisory RFC 3339 timestamp. Never used for ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Creates an envelope without a timestamp.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: None,
        }
    }

    /// Creates an envelope stamped with the current UTC time.
    pub fn now(event_type: impl Into<String>, data: Value) -> Self {
        Self::new(event_type, data).with_timestamp(chrono::Utc::now().to_rfc3339())
    }

    /// Replaces the timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Deserializes `data` into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Parses an envelope from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes the envelope to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
