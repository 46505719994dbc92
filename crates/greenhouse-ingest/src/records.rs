//! Records as returned by the third-party APIs

use crate::{IngestError, IngestResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use greenhouse_core::{ErrorLog, Measure, Sensor};
use serde::{Deserialize, Serialize};

/// One record of the MyFood hub `measures` feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    /// Hub label, e.g. "pH Sensor"
    pub sensor: String,
    /// Capture date as sent by the hub, UTC with or without offset
    pub capture_date: String,
    pub value: f64,
}

impl SensorRecord {
    pub fn captured_at(&self) -> IngestResult<DateTime<Utc>> {
        parse_utc(&self.capture_date)
    }

    /// Convert into a measure, failing on unknown sensors or dates
    pub fn to_measure(&self) -> IngestResult<Measure> {
        let sensor = Sensor::from_name(&self.sensor)
            .map_err(|e| IngestError::InvalidRecord(e.to_string()))?;
        Ok(Measure {
            sensor,
            capture_date: self.captured_at()?,
            value: self.value,
        })
    }
}

/// Dates are RFC 3339, or naive ISO 8601 meaning UTC
pub fn parse_utc(raw: &str) -> IngestResult<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| IngestError::InvalidRecord(format!("invalid date: {raw}")))
}

/// Sequence entry of the FarmBot API; only the name is used
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceInfo {
    pub name: String,
}

/// Log entry of the FarmBot API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    pub fn to_error_log(&self) -> ErrorLog {
        ErrorLog {
            kind: self.kind.clone(),
            message: self.message.clone(),
            timestamp: self.updated_at,
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_record_to_measure() {
        let json = r#"{"sensor":"pH Sensor","captureDate":"2021-05-03T10:00:00","value":6.7}"#;
        let record: SensorRecord = serde_json::from_str(json).unwrap();
        let measure = record.to_measure().unwrap();

        assert_eq!(measure.sensor, Sensor::Ph);
        assert_eq!(measure.capture_date.timestamp(), 1620036000);
        assert_eq!(measure.value, 6.7);
    }

    #[test]
    fn test_offset_dates_are_normalised() {
        let date = parse_utc("2021-05-03T12:00:00+02:00").unwrap();
        assert_eq!(date.timestamp(), 1620036000);
    }

    #[test]
    fn test_unknown_sensor_record() {
        let record = SensorRecord {
            sensor: "Dissolved Oxygen".into(),
            capture_date: "2021-05-03T10:00:00Z".into(),
            value: 1.0,
        };
        let err = record.to_measure().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Invalid record: Unknown sensor: Dissolved Oxygen");
    }

    #[test]
    fn test_farmbot_log_deserialize() {
        let json = r#"{"type":"error","message":"Movement failed","updated_at":"2021-05-03T10:00:00.000Z","x":10.5,"y":null}"#;
        let log: LogRecord = serde_json::from_str(json).unwrap();

        assert!(log.is_error());
        let error = log.to_error_log();
        assert_eq!(error.x, Some(10.5));
        assert_eq!(error.y, None);
        assert_eq!(error.timestamp.timestamp(), 1620036000);
    }
}
