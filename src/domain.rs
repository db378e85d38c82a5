//! ==============================================================================
//! domain.rs - readings, telemetry payloads and the viewer wire protocol
//! ==============================================================================
//!
//! wire shapes (json, one object per mqtt message / websocket frame):
//!
//! ```text
//!     device  -> relay   {"temperatureA": 24.5, "temperatureB": 25.1, "alertLevel": 1}
//!     relay   -> viewer  {"type": "sensor_data", "data": {..reading..}}
//!                        {"type": "historical_data", "data": [..readings..]}
//!                        {"type": "connection_status", "connected": true}
//!     viewer  -> relay   {"type": "get_historical_data", "limit": 50}
//! ```
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, RequestError};

/// highest led / alert level the device reports
pub const MAX_LED_LEVEL: i64 = 3;

/// one stored sensor observation
/// id and timestamp are assigned by the store, never by the device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: u64,
    pub device_id: String,
    /// dht11 temperature in celsius
    pub dht_temperature: f64,
    /// lm35 temperature in celsius
    pub lm35_temperature: f64,
    /// 0 (idle) ..= 3 (high temp)
    pub led_level: u8,
    pub timestamp: DateTime<Utc>,
}

// ==============================================================================
// upstream telemetry
// ==============================================================================
// the firmware publishes its own field names (suhuDHT / suhuLM35 / LED),
// accepted here as aliases of the canonical ones.

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TelemetryPayload {
    #[serde(rename = "temperatureA", alias = "suhuDHT")]
    pub temperature_a: f64,
    #[serde(rename = "temperatureB", alias = "suhuLM35")]
    pub temperature_b: f64,
    #[serde(rename = "alertLevel", alias = "LED")]
    pub alert_level: i64,
}

/// a payload that passed validation, ready to become a Reading
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidTelemetry {
    pub dht_temperature: f64,
    pub lm35_temperature: f64,
    pub led_level: u8,
}

impl TelemetryPayload {
    /// decode and validate a raw mqtt payload
    pub fn parse(bytes: &[u8]) -> Result<ValidTelemetry, IngestError> {
        let payload: TelemetryPayload = serde_json::from_slice(bytes)?;
        payload.validate()
    }

    pub fn validate(self) -> Result<ValidTelemetry, IngestError> {
        if !(0..=MAX_LED_LEVEL).contains(&self.alert_level) {
            return Err(IngestError::AlertLevelOutOfRange(self.alert_level));
        }
        Ok(ValidTelemetry {
            dht_temperature: self.temperature_a,
            lm35_temperature: self.temperature_b,
            led_level: self.alert_level as u8,
        })
    }
}

// ==============================================================================
// viewer protocol
// ==============================================================================

/// server -> viewer push event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerEvent {
    SensorData { data: Reading },
    HistoricalData { data: Vec<Reading> },
    ConnectionStatus { connected: bool },
}

impl ViewerEvent {
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// viewer -> server request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerRequest {
    GetHistoricalData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// any tag this relay does not know; ignored without a reply
    #[serde(other)]
    Unknown,
}

impl ViewerRequest {
    pub fn decode(text: &str) -> Result<Self, RequestError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_payload() {
        let valid = TelemetryPayload::parse(
            br#"{"temperatureA": 24.5, "temperatureB": 25.1, "alertLevel": 1}"#,
        )
        .unwrap();
        assert_eq!(valid.dht_temperature, 24.5);
        assert_eq!(valid.lm35_temperature, 25.1);
        assert_eq!(valid.led_level, 1);
    }

    #[test]
    fn parses_firmware_field_names() {
        let valid =
            TelemetryPayload::parse(br#"{"suhuDHT": 30.0, "suhuLM35": 31.2, "LED": 3}"#).unwrap();
        assert_eq!(valid.led_level, 3);
        assert_eq!(valid.lm35_temperature, 31.2);
    }

    #[test]
    fn rejects_alert_level_out_of_range() {
        let err = TelemetryPayload::parse(
            br#"{"temperatureA": 24.5, "temperatureB": 25.1, "alertLevel": 4}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::AlertLevelOutOfRange(4)));

        let err = TelemetryPayload::parse(
            br#"{"temperatureA": 24.5, "temperatureB": 25.1, "alertLevel": -1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::AlertLevelOutOfRange(-1)));
    }

    #[test]
    fn rejects_wrong_types_and_missing_fields() {
        for raw in [
            &br#"{"temperatureA": "hot", "temperatureB": 25.1, "alertLevel": 1}"#[..],
            br#"{"temperatureA": 24.5, "alertLevel": 1}"#,
            br#"{"temperatureA": 24.5, "temperatureB": 25.1, "alertLevel": 1.5}"#,
            br#"not json"#,
        ] {
            assert!(matches!(
                TelemetryPayload::parse(raw),
                Err(IngestError::Malformed(_))
            ));
        }
    }

    #[test]
    fn push_events_use_type_tag() {
        let frame = ViewerEvent::ConnectionStatus { connected: true }
            .to_frame()
            .unwrap();
        assert_eq!(frame, r#"{"type":"connection_status","connected":true}"#);

        let frame = ViewerEvent::HistoricalData { data: vec![] }.to_frame().unwrap();
        assert_eq!(frame, r#"{"type":"historical_data","data":[]}"#);
    }

    #[test]
    fn reading_serializes_camel_case() {
        let reading = Reading {
            id: 7,
            device_id: "G.231.22.0002".into(),
            dht_temperature: 24.5,
            lm35_temperature: 25.1,
            led_level: 1,
            timestamp: "2025-01-01T00:00:00Z".parse().unwrap(),
        };
        let value = serde_json::to_value(ViewerEvent::SensorData { data: reading }).unwrap();
        assert_eq!(value["type"], "sensor_data");
        assert_eq!(value["data"]["deviceId"], "G.231.22.0002");
        assert_eq!(value["data"]["lm35Temperature"], 25.1);
        assert_eq!(value["data"]["ledLevel"], 1);
        assert_eq!(value["data"]["timestamp"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn decodes_history_request() {
        assert_eq!(
            ViewerRequest::decode(r#"{"type":"get_historical_data","limit":10}"#).unwrap(),
            ViewerRequest::GetHistoricalData { limit: Some(10) }
        );
        assert_eq!(
            ViewerRequest::decode(r#"{"type":"get_historical_data"}"#).unwrap(),
            ViewerRequest::GetHistoricalData { limit: None }
        );
    }

    #[test]
    fn unknown_request_tag_is_explicit() {
        assert_eq!(
            ViewerRequest::decode(r#"{"type":"subscribe","table":"x"}"#).unwrap(),
            ViewerRequest::Unknown
        );
        assert!(ViewerRequest::decode(r#"{"limit":10}"#).is_err());
        assert!(ViewerRequest::decode("{").is_err());
    }
}
