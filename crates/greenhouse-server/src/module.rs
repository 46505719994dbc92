//! Feature modules
//!
//! A module bundles the endpoints and scheduled tasks of one feature area.
//! Modules that care about channel lifecycles override the [`Joinable`]
//! hooks; the defaults do nothing.

use crate::channel::{Channel, ChannelHub};
use crate::endpoint::Endpoint;
use crate::task::TaskOptions;
use greenhouse_config::AppConfig;
use greenhouse_db::DbClient;
use greenhouse_ingest::{FarmbotSource, MeasureSource};
use std::sync::Arc;

/// Shared dependencies handed to every module
#[derive(Clone)]
pub struct Services {
    pub db: DbClient,
    pub channels: ChannelHub,
    pub config: Arc<AppConfig>,
    pub measures: Arc<dyn MeasureSource>,
    pub farmbot: Arc<dyn FarmbotSource>,
}

#[async_trait::async_trait]
pub trait Joinable: Send + Sync {
    /// A channel connected
    async fn on_join(&self, _channel: &Channel) {}

    /// A channel disconnected
    async fn on_leave(&self, _channel: &Channel) {}
}

#[async_trait::async_trait]
pub trait Module: Joinable {
    fn name(&self) -> &str;

    fn endpoints(self: Arc<Self>) -> Vec<Endpoint>;

    /// Scheduled work; fails on an invalid configured schedule
    fn tasks(self: Arc<Self>) -> anyhow::Result<Vec<TaskOptions>> {
        Ok(Vec::new())
    }

    /// Startup work, awaited before the module's endpoints are served
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
