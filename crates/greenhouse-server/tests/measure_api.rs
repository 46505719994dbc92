mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{record, Fixture};
use greenhouse_server::modules::MeasureModule;
use greenhouse_server::{Joinable, OutboundFrame, CHANNEL_CAPACITY};
use serde_json::json;
use tokio::sync::mpsc;

/// Capture date `minutes` ago, whole seconds, as the hub formats it
fn minutes_ago(minutes: i64) -> String {
    (Utc::now() - Duration::minutes(minutes))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn batch() -> Vec<greenhouse_ingest::SensorRecord> {
    let date = minutes_ago(5);
    vec![
        record("pH Sensor", &date, 6.8),
        record("Water Temperature Sensor", &date, 21.5),
        record("Air Temperature Sensor", &date, 24.1),
        record("Air Humidity Sensor", &date, 61.0),
        record("External Air Humidity Sensor", &date, 70.2),
        record("External Air Temperature Sensor", &date, 18.3),
    ]
}

#[tokio::test]
async fn startup_update_fills_the_store() {
    let app = Fixture {
        records: batch(),
        ..Fixture::default()
    }
    .spawn()
    .await;

    let (status, body) = app.get("/getMeasures").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let measures = body.as_array().unwrap();
    assert_eq!(measures.len(), 6);
    assert!(measures.iter().any(|m| m["sensor"] == "ph" && m["value"] == 6.8));
}

#[tokio::test]
async fn empty_store_answers_no_records() {
    let app = Fixture::default().spawn().await;

    let (status, body) = app.get("/getMeasures").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No records");
    assert_eq!(body["message"], "No measure found");
}

#[tokio::test]
async fn filters_sort_and_limit() {
    let app = Fixture {
        records: batch(),
        ..Fixture::default()
    }
    .spawn()
    .await;

    let (status, body) = app
        .get("/getMeasures?sensors=ph,air%20temperature&sort=-value")
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        body,
        json!([
            { "sensor": "air temperature", "captureDate": body[0]["captureDate"], "value": 24.1 },
            { "sensor": "ph", "captureDate": body[1]["captureDate"], "value": 6.8 }
        ])
    );

    let (_, body) = app.get("/getMeasures?limit=2").await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    // window entirely in the past
    let (status, _) = app.get("/getMeasures?since=0&until=60").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/getMeasures?sort=color").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid argument");
}

#[tokio::test]
async fn update_skips_known_and_unknown_records() {
    let (services, source) = Fixture::default().services().await;
    let module = MeasureModule::new(services.clone());

    let date = minutes_ago(1);
    source.set_records(vec![
        record("pH Sensor", &date, 7.0),
        record("Dissolved Oxygen", &date, 8.2),
        record("Air Humidity Sensor", &date, 55.0),
    ]);

    let saved = module.update_measures().await.unwrap();
    assert_eq!(saved.len(), 2);

    // same batch again: nothing new
    let saved = module.update_measures().await.unwrap();
    assert!(saved.is_empty());
    assert_eq!(services.db.count_measures().await.unwrap(), 2);
}

#[tokio::test]
async fn update_is_broadcast_to_open_channels() {
    let (services, source) = Fixture::default().services().await;
    let module = MeasureModule::new(services.clone());

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    services.channels.open(tx).await;

    source.set_records(vec![record("pH Sensor", &minutes_ago(2), 6.9)]);
    module.update_measures().await.unwrap();

    match rx.recv().await.unwrap() {
        OutboundFrame::Event { event, data } => {
            assert_eq!(event, "updateMeasures");
            assert_eq!(data["measures"].as_array().unwrap().len(), 1);
            assert_eq!(data["measures"][0]["sensor"], "ph");
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn channel_requests_are_dispatched_by_path() {
    let app = Fixture {
        records: batch(),
        ..Fixture::default()
    }
    .spawn()
    .await;

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let channel = app.state.services().channels.open(tx).await;

    app.state
        .dispatch_frame(&channel, r#"{"path":"/getMeasures","sensors":"ph"}"#)
        .await;
    match rx.recv().await.unwrap() {
        OutboundFrame::Response { path, data } => {
            assert_eq!(path, "/getMeasures");
            assert_eq!(data.as_array().unwrap().len(), 1);
        }
        other => panic!("unexpected frame {other:?}"),
    }

    app.state
        .dispatch_frame(&channel, r#"{"path":"/getSomething"}"#)
        .await;
    assert_eq!(
        rx.recv().await.unwrap(),
        OutboundFrame::Error {
            path: "/getSomething".to_string(),
            error: "No endpoint".to_string(),
            message: "No endpoint matches /getSomething".to_string(),
        }
    );

    // frames without a path go to '/', which nothing serves
    app.state.dispatch_frame(&channel, r#"{"since":0}"#).await;
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundFrame::Error { path, .. } if path == "/"
    ));

    app.state.dispatch_frame(&channel, "not json").await;
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundFrame::Error { error, .. } if error == "Invalid argument"
    ));
}

#[tokio::test]
async fn joining_channel_receives_latest_batch() {
    let (services, source) = Fixture::default().services().await;
    let module = MeasureModule::new(services.clone());

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let channel = services.channels.open(tx).await;

    // nothing stored yet: no event
    module.on_join(&channel).await;
    assert!(rx.try_recv().is_err());

    source.set_records(batch());
    module.update_measures().await.unwrap();
    let _broadcast = rx.recv().await.unwrap();

    module.on_join(&channel).await;
    match rx.recv().await.unwrap() {
        OutboundFrame::Event { event, data } => {
            assert_eq!(event, "updateMeasures");
            assert_eq!(data["measures"].as_array().unwrap().len(), 6);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}
