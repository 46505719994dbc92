mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use common::spawn_app;
use tower::ServiceExt;

#[tokio::test]
async fn health_ready_metrics_endpoints() {
    let app = spawn_app().await;

    let (status, _) = app.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);

    // not ready until serve() marks it
    let (status, _) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    app.state.set_ready(true);
    let (status, _) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);

    // /metrics returns prometheus text and contains our counter
    let res = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ct = res.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(ct.starts_with("text/plain"));
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("greenhouse_requests_total"));
}

#[tokio::test]
async fn unknown_path_is_a_json_404() {
    let app = spawn_app().await;

    let (status, body) = app.get("/doesNotExist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
    assert_eq!(body["message"], "No endpoint matches GET /doesNotExist");
}

#[tokio::test]
async fn paths_match_case_insensitively() {
    let app = spawn_app().await;

    let (status, body) = app.get("/getocmodules").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modules"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn module_tasks_are_listed_by_origin() {
    let app = spawn_app().await;

    let (status, body) = app.get("/getTasks").await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body.as_array().unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|task| task["running"] == false));
    assert!(tasks.iter().all(|task| !task["nextCall"].is_null()));

    let (_, body) = app.get("/getTasks?origin=MeasureModule").await;
    let tasks = body.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["origin"], "MeasureModule");

    let (_, body) = app.get("/getTasks?running=true").await;
    assert!(body.as_array().unwrap().is_empty());

    let (_, body) = app.get("/getTasks?origin=orphan").await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn every_module_endpoint_is_registered() {
    let app = spawn_app().await;
    let endpoints = app.state.endpoints();

    for path in [
        "/getMeasures",
        "/getFarmbotDailySumUp",
        "/getOCModule",
        "/getOCModules",
        "/addOCUnit",
        "/moveOCUnit",
        "/changeOCUnitSlots",
        "/removeOCUnit",
        "/editOCElement",
        "/login",
        "/register",
        "/logout",
    ] {
        assert!(!endpoints.find(path, None).is_empty(), "{path} missing");
    }
}
