//! FarmBot web API client

use crate::{FarmbotSource, IngestError, IngestResult, LogRecord, SequenceInfo};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct FarmbotClient {
    client: Client,
    base_url: String,
    token: String,
}

impl FarmbotClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> IngestResult<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(IngestError::NotConfigured("farmbot base url".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, resource: &str) -> IngestResult<T> {
        if self.token.is_empty() {
            return Err(IngestError::NotConfigured("farmbot token".to_string()));
        }

        let url = format!("{}/{}", self.base_url, resource);
        // the API expects the raw token, not a bearer scheme
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IngestError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait::async_trait]
impl FarmbotSource for FarmbotClient {
    fn name(&self) -> &str {
        "farmbot"
    }

    #[instrument(skip(self))]
    async fn sequences(&self) -> IngestResult<Vec<String>> {
        let sequences: Vec<SequenceInfo> = self.get("sequences").await?;
        debug!(count = sequences.len(), "farmbot sequences received");
        Ok(sequences.into_iter().map(|s| s.name).collect())
    }

    #[instrument(skip(self))]
    async fn logs(&self) -> IngestResult<Vec<LogRecord>> {
        let logs: Vec<LogRecord> = self.get("logs").await?;
        debug!(count = logs.len(), "farmbot logs received");
        Ok(logs)
    }
}
