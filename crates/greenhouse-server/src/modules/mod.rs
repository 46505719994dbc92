//! Feature modules served by the application

pub mod farmbot;
pub mod measure;
pub mod occupancy;
pub mod user;

pub use farmbot::FarmbotLogsModule;
pub use measure::MeasureModule;
pub use occupancy::OccupancyRateModule;
pub use user::UserModule;

use crate::error::{ApiError, ApiResult};
use crate::module::{Module, Services};
use crate::query::from_text;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Modules registered by `greenhoused`, in registration order
pub fn default_modules(services: Services) -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(MeasureModule::new(services.clone())),
        Arc::new(FarmbotLogsModule::new(services.clone())),
        Arc::new(OccupancyRateModule::new(services.clone())),
        Arc::new(UserModule::new(services)),
    ]
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(ApiError::unexpected)
}

/// Unix seconds into a date, rejecting out-of-range values
pub(crate) fn from_unix_text<'de, D>(de: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: Option<i64> = from_text(de)?;
    let Some(secs) = secs else {
        return Ok(None);
    };
    greenhouse_core::from_unix(secs)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("Invalid value: {secs}")))
}
