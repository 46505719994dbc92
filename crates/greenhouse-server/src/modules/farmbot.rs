//! Daily sum-up of the FarmBot activity

use super::{from_unix_text, to_json};
use crate::endpoint::{Endpoint, Method};
use crate::error::{ApiError, ApiResult};
use crate::module::{Joinable, Module, Services};
use crate::query::Params;
use crate::task::{TaskOptions, TaskSchedule};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use greenhouse_core::FarmbotLogSumup;
use greenhouse_ingest::build_sumup;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const NAME: &str = "FarmbotLogsModule";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SumupQuery {
    #[serde(deserialize_with = "from_unix_text")]
    since: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "from_unix_text")]
    until: Option<DateTime<Utc>>,
}

/// Parameters of `/getFarmbotDailySumUp`
#[derive(Debug, PartialEq)]
pub struct SumupParams {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SumupParams {
    /// Defaults to the last 30 days
    pub fn parse(params: &Params, now: DateTime<Utc>) -> ApiResult<Self> {
        let SumupQuery { since, until } = params.decode()?;
        Ok(Self {
            since: since.unwrap_or(now - Duration::days(30)),
            until: until.unwrap_or(now + Duration::minutes(1)),
        })
    }
}

pub struct FarmbotLogsModule {
    services: Services,
}

impl FarmbotLogsModule {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Build today's sum-up from the FarmBot API and store it
    #[instrument(skip(self))]
    pub async fn update_sumup(&self) -> anyhow::Result<FarmbotLogSumup> {
        let source = &self.services.farmbot;
        let sequences = source
            .sequences()
            .await
            .with_context(|| format!("failed to fetch sequences from {}", source.name()))?;
        let logs = source
            .logs()
            .await
            .with_context(|| format!("failed to fetch logs from {}", source.name()))?;

        let sumup = build_sumup(&sequences, &logs, Utc::now());
        let id = self.services.db.insert_sumup(&sumup).await?;
        info!(
            id,
            completed = sumup.completed_sequences.len(),
            uncompleted = sumup.uncompleted_sequences.len(),
            errors = sumup.error_logs.len(),
            "sum-up stored"
        );

        if self.services.config.mail.send {
            warn!("mail delivery is not available, sum-up not sent");
        }
        Ok(sumup)
    }

    pub async fn get_sumups(&self, params: &Params) -> ApiResult<Vec<FarmbotLogSumup>> {
        let SumupParams { since, until } = SumupParams::parse(params, Utc::now())?;
        let sumups = self.services.db.find_sumups(since, until).await?;
        if sumups.is_empty() {
            return Err(ApiError::no_records("No sum up found"));
        }
        Ok(sumups)
    }
}

impl Joinable for FarmbotLogsModule {}

#[async_trait::async_trait]
impl Module for FarmbotLogsModule {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoints(self: Arc<Self>) -> Vec<Endpoint> {
        vec![Endpoint::http(
            Method::GET,
            "/getFarmbotDailySumUp",
            move |params| {
                let module = Arc::clone(&self);
                async move { to_json(&module.get_sumups(&params).await?) }
            },
        )]
    }

    fn tasks(self: Arc<Self>) -> anyhow::Result<Vec<TaskOptions>> {
        let expr = &self.services.config.farmbot.sumup_schedule;
        let schedule = TaskSchedule::cron(expr).context("invalid FarmBot sum-up schedule")?;
        Ok(vec![TaskOptions::new(schedule, move |_task| {
            let module = Arc::clone(&self);
            async move { module.update_sumup().await.map(|_| ()) }
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_core::from_unix;

    #[test]
    fn test_default_window() {
        let now = from_unix(1_700_000_000).unwrap();
        let params = SumupParams::parse(&Params::default(), now).unwrap();

        assert_eq!(params.since, now - Duration::days(30));
        assert_eq!(params.until, now + Duration::minutes(1));
    }

    #[test]
    fn test_explicit_window() {
        let now = from_unix(1_700_000_000).unwrap();
        let params = SumupParams::parse(
            &Params::from([("since", "1600000000"), ("until", "1600086400")]),
            now,
        )
        .unwrap();

        assert_eq!(Some(params.since), from_unix(1_600_000_000));
        assert_eq!(Some(params.until), from_unix(1_600_086_400));
    }

    #[test]
    fn test_invalid_since() {
        let err = SumupParams::parse(&Params::from([("since", "yesterday")]), Utc::now())
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value: yesterday");
    }
}
