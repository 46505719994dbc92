//! Sensor measures and the query shape used to read them back

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp type (Unix epoch seconds)
pub type Timestamp = i64;

/// Convert Unix seconds into a UTC date, `None` when out of range
pub fn from_unix(secs: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Sensor that recorded a measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    #[serde(rename = "ph")]
    Ph,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "air temperature")]
    AirTemperature,
    #[serde(rename = "water temperature")]
    WaterTemperature,
    #[serde(rename = "external air humidity")]
    ExternalAirHumidity,
    #[serde(rename = "external air temperature")]
    ExternalAirTemperature,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown sensor: {0}")]
pub struct UnknownSensor(pub String);

impl Sensor {
    pub const ALL: [Sensor; 6] = [
        Sensor::Ph,
        Sensor::Humidity,
        Sensor::AirTemperature,
        Sensor::WaterTemperature,
        Sensor::ExternalAirHumidity,
        Sensor::ExternalAirTemperature,
    ];

    /// Stored name of the sensor
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Ph => "ph",
            Sensor::Humidity => "humidity",
            Sensor::AirTemperature => "air temperature",
            Sensor::WaterTemperature => "water temperature",
            Sensor::ExternalAirHumidity => "external air humidity",
            Sensor::ExternalAirTemperature => "external air temperature",
        }
    }

    /// Resolve a sensor from the stored name or from the label used by the
    /// MyFood hub ("pH Sensor", "Air Humidity Sensor", ...)
    pub fn from_name(name: &str) -> Result<Sensor, UnknownSensor> {
        match name.trim().to_lowercase().as_str() {
            "ph sensor" | "ph" => Ok(Sensor::Ph),
            "water temperature sensor" | "water temperature" => Ok(Sensor::WaterTemperature),
            "air temperature sensor" | "air temperature" => Ok(Sensor::AirTemperature),
            "air humidity sensor" | "air humidity" | "humidity" => Ok(Sensor::Humidity),
            "external air humidity sensor" | "external air humidity" => {
                Ok(Sensor::ExternalAirHumidity)
            }
            "external air temperature sensor" | "external air temperature" => {
                Ok(Sensor::ExternalAirTemperature)
            }
            _ => Err(UnknownSensor(name.to_string())),
        }
    }
}

impl FromStr for Sensor {
    type Err = UnknownSensor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sensor::from_name(s)
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sensor reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub sensor: Sensor,
    pub capture_date: DateTime<Utc>,
    /// Value of the measure (unit depends on the sensor)
    pub value: f64,
}

/// Field a measure query can be sorted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureField {
    Sensor,
    CaptureDate,
    Value,
}

impl MeasureField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureField::Sensor => "sensor",
            MeasureField::CaptureDate => "captureDate",
            MeasureField::Value => "value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown sort field: {0}")]
pub struct UnknownField(pub String);

/// One sort criterion, `-field` meaning descending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: MeasureField,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: MeasureField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: MeasureField) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl FromStr for SortKey {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let field = match name {
            "sensor" => MeasureField::Sensor,
            "captureDate" => MeasureField::CaptureDate,
            "value" => MeasureField::Value,
            _ => return Err(UnknownField(s.to_string())),
        };
        Ok(Self { field, descending })
    }
}

/// Filters applied when reading stored measures
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureQuery {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub sensors: Vec<Sensor>,
    pub sort: Vec<SortKey>,
    pub limit: u32,
}

impl MeasureQuery {
    /// Default window looks 20 minutes back and 1 minute ahead of `now`
    pub fn window_at(now: DateTime<Utc>) -> Self {
        Self {
            since: now - Duration::minutes(20),
            until: now + Duration::minutes(1),
            sensors: Sensor::ALL.to_vec(),
            sort: Self::default_sort(),
            limit: Sensor::ALL.len() as u32,
        }
    }

    /// Most recent first, then by sensor name
    pub fn default_sort() -> Vec<SortKey> {
        vec![
            SortKey::desc(MeasureField::CaptureDate),
            SortKey::asc(MeasureField::Sensor),
        ]
    }
}
