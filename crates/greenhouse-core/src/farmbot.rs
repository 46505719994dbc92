//! FarmBot daily sum-up document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error entry reported by the FarmBot during the day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLog {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub z: Option<f64>,
}

/// One day of FarmBot activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FarmbotLogSumup {
    pub date: DateTime<Utc>,
    pub completed_sequences: Vec<String>,
    pub uncompleted_sequences: Vec<String>,
    pub error_logs: Vec<ErrorLog>,
}

impl FarmbotLogSumup {
    pub fn empty(date: DateTime<Utc>) -> Self {
        Self {
            date,
            completed_sequences: Vec::new(),
            uncompleted_sequences: Vec::new(),
            error_logs: Vec::new(),
        }
    }
}
