#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use greenhouse_config::AppConfig;
use greenhouse_db::DbClient;
use greenhouse_ingest::{LogRecord, SensorRecord, StaticFarmbotSource, StaticMeasureSource};
use greenhouse_server::{AppState, Application, ChannelHub, Services};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "admin@greenhouse.test";
pub const ADMIN_PASSWORD: &str = "admin-password";

/// Config for tests: no autostarted tasks, cheap hashing, bootstrap admin
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.autostart = false;
    config.security.salt_rounds = 4;
    config.security.secret = "test-secret".to_string();
    config.security.admin_email = Some(ADMIN_EMAIL.to_string());
    config.security.admin_password = Some(ADMIN_PASSWORD.to_string());
    config
}

pub fn record(sensor: &str, capture_date: &str, value: f64) -> SensorRecord {
    SensorRecord {
        sensor: sensor.to_string(),
        capture_date: capture_date.to_string(),
        value,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub measures: Arc<StaticMeasureSource>,
}

pub struct Fixture {
    pub config: AppConfig,
    pub records: Vec<SensorRecord>,
    pub sequences: Vec<String>,
    pub logs: Vec<LogRecord>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            config: test_config(),
            records: Vec::new(),
            sequences: Vec::new(),
            logs: Vec::new(),
        }
    }
}

impl Fixture {
    pub async fn services(self) -> (Services, Arc<StaticMeasureSource>) {
        let db = DbClient::in_memory().await.unwrap();
        let measures = Arc::new(StaticMeasureSource::new(self.records));
        let services = Services {
            db,
            channels: ChannelHub::new(),
            config: Arc::new(self.config),
            measures: measures.clone(),
            farmbot: Arc::new(StaticFarmbotSource::new(self.sequences, self.logs)),
        };
        (services, measures)
    }

    pub async fn spawn(self) -> TestApp {
        let (services, measures) = self.services().await;
        TestApp::new(services, measures).await
    }
}

pub async fn spawn_app() -> TestApp {
    Fixture::default().spawn().await
}

impl TestApp {
    /// Application with the default modules over existing services
    pub async fn new(services: Services, measures: Arc<StaticMeasureSource>) -> Self {
        let (router, state) = Application::with_default_modules(services)
            .await
            .build()
            .unwrap();
        Self {
            router,
            state,
            measures,
        }
    }

    /// Send a request with an empty body; the JSON body is `Null` when empty
    pub async fn call(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let res = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call("GET", uri).await
    }

    /// Log in with the bootstrap administrator and return the token
    pub async fn admin_token(&self) -> String {
        let (status, body) = self
            .call(
                "POST",
                &format!("/login?email={ADMIN_EMAIL}&password={ADMIN_PASSWORD}"),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["user"]["token"].as_str().unwrap().to_string()
    }
}
