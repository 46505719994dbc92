//! MyFood open-data hub client

use crate::{IngestError, IngestResult, MeasureSource, SensorRecord};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct MyFoodClient {
    client: Client,
    base_url: String,
}

impl MyFoodClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> IngestResult<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(IngestError::NotConfigured("myfood base url".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn measures_url(&self, greenhouse_id: u32) -> String {
        format!(
            "{}/productionunits/{}/measures",
            self.base_url, greenhouse_id
        )
    }
}

#[async_trait::async_trait]
impl MeasureSource for MyFoodClient {
    fn name(&self) -> &str {
        "myfood"
    }

    #[instrument(skip(self))]
    async fn latest_records(&self, greenhouse_id: u32) -> IngestResult<Vec<SensorRecord>> {
        let url = self.measures_url(greenhouse_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(IngestError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }

        let records: Vec<SensorRecord> = resp.json().await?;
        debug!(count = records.len(), "myfood records received");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measures_url() {
        let client =
            MyFoodClient::new("https://hub.myfood.eu/opendata/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.measures_url(191),
            "https://hub.myfood.eu/opendata/productionunits/191/measures"
        );
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            MyFoodClient::new("", Duration::from_secs(5)),
            Err(IngestError::NotConfigured(_))
        ));
    }
}
