//! Sensor measures from the MyFood hub

use super::{from_unix_text, to_json};
use crate::channel::Channel;
use crate::endpoint::{Endpoint, Method};
use crate::error::{ApiError, ApiResult};
use crate::module::{Joinable, Module, Services};
use crate::query::{from_text, from_text_list, Params};
use crate::task::{TaskOptions, TaskSchedule};
use anyhow::Context;
use chrono::{DateTime, Utc};
use greenhouse_core::{Measure, MeasureQuery, Sensor, SortKey};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const NAME: &str = "MeasureModule";
pub const UPDATE_SCHEDULE: &str = "0 */10 * * * *";
pub const UPDATE_EVENT: &str = "updateMeasures";

/// Parameters of `/getMeasures`
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MeasureParams {
    #[serde(deserialize_with = "from_unix_text")]
    pub since: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "from_unix_text")]
    pub until: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "from_text_list")]
    pub sensors: Option<Vec<Sensor>>,
    #[serde(deserialize_with = "from_text_list")]
    pub sort: Option<Vec<SortKey>>,
    #[serde(deserialize_with = "from_text")]
    pub limit: Option<u32>,
}

impl MeasureParams {
    pub fn parse(params: &Params) -> ApiResult<Self> {
        params.decode()
    }

    /// Fill the absent filters with the default window around `now`
    pub fn into_query(self, now: DateTime<Utc>) -> MeasureQuery {
        let defaults = MeasureQuery::window_at(now);
        MeasureQuery {
            since: self.since.unwrap_or(defaults.since),
            until: self.until.unwrap_or(defaults.until),
            sensors: self.sensors.unwrap_or(defaults.sensors),
            sort: self.sort.unwrap_or(defaults.sort),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

pub struct MeasureModule {
    services: Services,
}

impl MeasureModule {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Fetch the latest hub records, store the new ones and broadcast them
    #[instrument(skip(self))]
    pub async fn update_measures(&self) -> anyhow::Result<Vec<Measure>> {
        let greenhouse_id = self.services.config.myfood.greenhouse_id;
        let source = &self.services.measures;
        info!(source = source.name(), greenhouse_id, "fetching measures");

        let records = source
            .latest_records(greenhouse_id)
            .await
            .with_context(|| format!("failed to fetch records from {}", source.name()))?;
        info!(count = records.len(), "records received");

        // the feed is newest first, one record per sensor per batch
        let mut saved = Vec::new();
        for record in records.iter().take(Sensor::ALL.len()) {
            let measure = match record.to_measure() {
                Ok(measure) => measure,
                Err(e) => {
                    warn!(sensor = %record.sensor, error = %e, "record skipped");
                    continue;
                }
            };
            if self.services.db.measure_exists(&measure).await? {
                continue;
            }
            self.services.db.insert_measure(&measure).await?;
            saved.push(measure);
        }

        let delivered = self
            .services
            .channels
            .broadcast(UPDATE_EVENT, json!({ "measures": saved }))
            .await;
        info!(new = saved.len(), delivered, "measures updated");
        Ok(saved)
    }

    pub async fn get_measures(&self, params: &Params) -> ApiResult<Vec<Measure>> {
        let query = MeasureParams::parse(params)?.into_query(Utc::now());
        let measures = self.services.db.find_measures(&query).await?;
        if measures.is_empty() {
            return Err(ApiError::no_records("No measure found"));
        }
        Ok(measures)
    }
}

#[async_trait::async_trait]
impl Joinable for MeasureModule {
    /// New channels get the latest stored batch right away
    async fn on_join(&self, channel: &Channel) {
        match self.services.db.latest_measures(Sensor::ALL.len() as u32).await {
            Ok(measures) if !measures.is_empty() => {
                channel.emit(UPDATE_EVENT, json!({ "measures": measures }));
            }
            Ok(_) => {}
            Err(e) => warn!(channel = channel.id(), error = %e, "latest measures unavailable"),
        }
    }
}

#[async_trait::async_trait]
impl Module for MeasureModule {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoints(self: Arc<Self>) -> Vec<Endpoint> {
        let http = Arc::clone(&self);
        let channel = self;
        vec![
            Endpoint::http(Method::GET, "/getMeasures", move |params| {
                let module = Arc::clone(&http);
                async move { to_json(&module.get_measures(&params).await?) }
            }),
            Endpoint::channel("/getMeasures", move |_path, data, _channel| {
                let module = Arc::clone(&channel);
                async move {
                    let measures = module.get_measures(&Params::from_json(&data)).await?;
                    Ok(Some(to_json(&measures)?))
                }
            }),
        ]
    }

    fn tasks(self: Arc<Self>) -> anyhow::Result<Vec<TaskOptions>> {
        let schedule = TaskSchedule::cron(UPDATE_SCHEDULE)?;
        Ok(vec![TaskOptions::new(schedule, move |_task| {
            let module = Arc::clone(&self);
            async move { module.update_measures().await.map(|_| ()) }
        })])
    }

    /// Fill the store with the current values so it is not empty at startup
    async fn init(&self) -> anyhow::Result<()> {
        if let Err(e) = self.update_measures().await {
            warn!(error = %format!("{e:#}"), "initial measure update failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_core::{from_unix, MeasureField};

    #[test]
    fn test_params_defaults() {
        let now = from_unix(1_700_000_000).unwrap();
        let query = MeasureParams::parse(&Params::default())
            .unwrap()
            .into_query(now);

        assert_eq!(query, MeasureQuery::window_at(now));
    }

    #[test]
    fn test_params_parsing() {
        let params = Params::from([
            ("since", "1620036000"),
            ("sensors", "ph,air temperature"),
            ("sort", "value,-sensor"),
            ("limit", "2"),
        ]);
        let parsed = MeasureParams::parse(&params).unwrap();

        assert_eq!(parsed.since, from_unix(1_620_036_000));
        assert_eq!(parsed.until, None);
        assert_eq!(
            parsed.sensors,
            Some(vec![Sensor::Ph, Sensor::AirTemperature])
        );
        assert_eq!(
            parsed.sort,
            Some(vec![
                SortKey::asc(MeasureField::Value),
                SortKey::desc(MeasureField::Sensor)
            ])
        );
        assert_eq!(parsed.limit, Some(2));
    }

    #[test]
    fn test_unknown_sensor_param_is_rejected() {
        let err = MeasureParams::parse(&Params::from([("sensors", "ph,co2")])).unwrap_err();
        assert_eq!(err.tag(), "Invalid argument");
        assert_eq!(err.to_string(), "Invalid value: Unknown sensor: co2");
    }
}
