//! In-memory sources for tests and offline runs

use crate::{FarmbotSource, IngestResult, LogRecord, MeasureSource, SensorRecord};
use std::sync::{Mutex, PoisonError};

/// Measure source serving whatever records were last set
#[derive(Default)]
pub struct StaticMeasureSource {
    records: Mutex<Vec<SensorRecord>>,
}

impl StaticMeasureSource {
    pub fn new(records: Vec<SensorRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn set_records(&self, records: Vec<SensorRecord>) {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records;
    }
}

#[async_trait::async_trait]
impl MeasureSource for StaticMeasureSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn latest_records(&self, _greenhouse_id: u32) -> IngestResult<Vec<SensorRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// FarmBot source with fixed sequences and logs
#[derive(Default)]
pub struct StaticFarmbotSource {
    sequences: Vec<String>,
    logs: Vec<LogRecord>,
}

impl StaticFarmbotSource {
    pub fn new(sequences: Vec<String>, logs: Vec<LogRecord>) -> Self {
        Self { sequences, logs }
    }
}

#[async_trait::async_trait]
impl FarmbotSource for StaticFarmbotSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn sequences(&self) -> IngestResult<Vec<String>> {
        Ok(self.sequences.clone())
    }

    async fn logs(&self) -> IngestResult<Vec<LogRecord>> {
        Ok(self.logs.clone())
    }
}
