//! Application shell
//!
//! Registers modules, binds their HTTP endpoints into an axum router and
//! dispatches WebSocket frames to their channel endpoints.

use crate::channel::{Channel, OutboundFrame, CHANNEL_CAPACITY};
use crate::endpoint::{Endpoint, EndpointKind, EndpointList, Method};
use crate::error::ApiError;
use crate::module::{Module, Services};
use crate::modules;
use crate::query::Params;
use crate::task::{TaskPool, TaskSummary};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

/// Paths served by the shell itself
const RESERVED_PATHS: [&str; 5] = ["/healthz", "/readyz", "/metrics", "/getTasks", "/ws"];

pub struct AppState {
    ready: AtomicBool,
    registry: Registry,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
    requests_total: Counter<u64>,
    endpoints: EndpointList,
    modules: Vec<Arc<dyn Module>>,
    tasks: TaskPool,
    services: Services,
    public_path: Option<PathBuf>,
}

pub struct Application {
    services: Services,
    endpoints: EndpointList,
    modules: Vec<Arc<dyn Module>>,
    tasks: TaskPool,
}

impl Application {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            endpoints: EndpointList::new(),
            modules: Vec::new(),
            tasks: TaskPool::new(),
        }
    }

    /// Application with the measure, FarmBot, occupancy-rate and user modules
    pub async fn with_default_modules(services: Services) -> Self {
        let mut app = Self::new(services.clone());
        for module in modules::default_modules(services) {
            app.register_module(module).await;
        }
        app
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// Initialize a module, then add its endpoints and tasks.
    /// A failed init is logged and the module is registered anyway.
    pub async fn register_module(&mut self, module: Arc<dyn Module>) {
        let name = module.name().to_string();

        if let Err(e) = module.init().await {
            warn!(module = %name, error = %format!("{e:#}"), "module init failed");
        }

        let endpoints = Arc::clone(&module).endpoints();
        let endpoint_count = endpoints.len();
        self.endpoints.register_many(endpoints);

        let autostart = self.services.config.scheduler.autostart;
        let tasks = Arc::clone(&module).tasks().unwrap_or_else(|e| {
            error!(module = %name, error = %format!("{e:#}"), "module tasks not scheduled");
            Vec::new()
        });
        let task_count = tasks.len();
        for options in tasks {
            self.tasks
                .create(options.origin(name.as_str()).auto_start(autostart));
        }

        info!(
            module = %name,
            endpoints = endpoint_count,
            tasks = task_count,
            "module registered"
        );
        self.modules.push(module);
    }

    /// Build the router and its shared state
    pub fn build(self) -> Result<(Router, Arc<AppState>)> {
        // Prometheus exporter via OpenTelemetry
        let registry = Registry::new();
        let reader = exporter()
            .with_registry(registry.clone())
            .build()
            .context("failed to build prometheus exporter")?;
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = provider.meter("greenhouse-server");

        let requests_total = meter
            .u64_counter("greenhouse_requests_total")
            .with_description("Total HTTP requests served")
            .init();

        let public_path = self.services.config.server.public_path.as_ref().map(PathBuf::from);
        match &public_path {
            Some(path) => info!(path = %path.display(), "serving public directory"),
            None => debug!("no public directory"),
        }

        let state = Arc::new(AppState {
            ready: AtomicBool::new(false),
            registry,
            provider,
            requests_total,
            endpoints: self.endpoints,
            modules: self.modules,
            tasks: self.tasks,
            services: self.services,
            public_path,
        });

        let mut router = Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route("/metrics", get(metrics))
            .route("/getTasks", get(get_tasks))
            .route("/ws", get(ws_upgrade));

        for (path, methods) in state.endpoints.http_routes() {
            if RESERVED_PATHS.iter().any(|r| r.eq_ignore_ascii_case(&path)) {
                warn!(%path, "endpoint path is reserved, skipped");
                continue;
            }

            let mut route: MethodRouter<Arc<AppState>> = MethodRouter::new();
            for method in methods {
                let Ok(filter) = MethodFilter::try_from(method.clone()) else {
                    warn!(%method, %path, "unsupported method, skipped");
                    continue;
                };
                let path = path.clone();
                route = route.on(
                    filter,
                    move |State(state): State<Arc<AppState>>,
                          Query(params): Query<HashMap<String, String>>| async move {
                        state.dispatch_http(&path, &method, params.into()).await
                    },
                );
            }
            router = router.route(&path, route);
        }

        let router = router.fallback(fallback).with_state(Arc::clone(&state));
        Ok((router, state))
    }

    /// Serve until Ctrl-C, then stop every task
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self
            .services
            .config
            .bind_addr()
            .parse()
            .context("invalid HTTP bind address")?;
        let (router, state) = self.build()?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        // Mark ready just before serving
        state.set_ready(true);
        info!(%addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        state.set_ready(false);
        state.tasks.stop_all();
        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down...");
}

impl AppState {
    pub fn set_ready(&self, is_ready: bool) {
        self.ready.store(is_ready, Ordering::Relaxed);
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    async fn dispatch_http(&self, path: &str, method: &Method, params: Params) -> Response {
        self.requests_total.add(1, &[]);

        let Some(Endpoint::Http { handler, .. }) = self.endpoints.last_http(path, method) else {
            return not_found(method.as_str(), path);
        };

        debug!(%method, %path, "http request");
        match handler(params).await {
            Ok(body) => Json(body).into_response(),
            Err(e) => {
                debug!(%method, %path, error = e.tag(), "request rejected");
                e.into_response()
            }
        }
    }

    /// Handle one inbound text frame `{path, ...data}`; `path` defaults to `/`
    pub async fn dispatch_frame(&self, channel: &Channel, text: &str) {
        let data: Value = match serde_json::from_str(text) {
            Ok(data @ Value::Object(_)) => data,
            _ => {
                channel.send(OutboundFrame::error(
                    "/",
                    &ApiError::invalid("Frames must be JSON objects"),
                ));
                return;
            }
        };

        let path = match data.get("path").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => {
                debug!(channel = channel.id(), "request without path, redirecting to '/'");
                "/".to_string()
            }
        };

        self.handle_channel_request(channel, &path, data).await;
    }

    pub async fn handle_channel_request(&self, channel: &Channel, path: &str, data: Value) {
        let Some(Endpoint::Channel { handler, .. }) =
            self.endpoints.last(path, EndpointKind::Channel)
        else {
            warn!(channel = channel.id(), %path, "no matching channel endpoint");
            channel.send(OutboundFrame::error(
                path,
                &ApiError::NotFound {
                    tag: "No endpoint".to_string(),
                    message: format!("No endpoint matches {path}"),
                },
            ));
            return;
        };

        debug!(channel = channel.id(), %path, "channel request");
        match handler(path.to_string(), data, channel.clone()).await {
            Ok(Some(reply)) => {
                channel.reply(path, reply);
            }
            Ok(None) => {}
            Err(e) => {
                channel.send(OutboundFrame::error(path, &e));
            }
        }
    }

    async fn join(&self, channel: &Channel) {
        for module in &self.modules {
            module.on_join(channel).await;
        }
        info!(channel = channel.id(), "channel connected");
    }

    async fn leave(&self, channel: &Channel) {
        for module in &self.modules {
            module.on_leave(channel).await;
        }
        self.services.channels.close(channel.id()).await;
        info!(channel = channel.id(), "channel disconnected");
    }
}

fn not_found(method: &str, path: &str) -> Response {
    ApiError::NotFound {
        tag: "Not found".to_string(),
        message: format!("No endpoint matches {method} {path}"),
    }
    .into_response()
}

async fn healthz(State(state): State<Arc<AppState>>) -> StatusCode {
    state.requests_total.add(1, &[]);
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(
    State(state): State<Arc<AppState>>,
) -> (
    [(axum::http::header::HeaderName, axum::http::HeaderValue); 1],
    String,
) {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        warn!(error = ?e, "failed to encode metrics");
    }
    let body = String::from_utf8(buf).unwrap_or_default();
    let header = (
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    ([header], body)
}

#[derive(Deserialize)]
struct TasksQuery {
    origin: Option<String>,
    running: Option<bool>,
}

async fn get_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TasksQuery>,
) -> Json<Vec<TaskSummary>> {
    state.requests_total.add(1, &[]);
    let tasks = match q.origin.as_deref() {
        Some(origin) => state.tasks.from_origin(Some(origin)),
        None => state.tasks.tasks(),
    };
    Json(
        tasks
            .iter()
            .map(|task| task.summary())
            .filter(|summary| q.running.map_or(true, |r| summary.running == r))
            .collect(),
    )
}

/// Other spellings of registered paths, then static files, then 404
async fn fallback(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    let method = req.method().clone();
    if state.endpoints.last_http(&path, &method).is_some() {
        return match Query::<HashMap<String, String>>::try_from_uri(&uri) {
            Ok(Query(params)) => state.dispatch_http(&path, &method, params.into()).await,
            Err(e) => ApiError::invalid(e.body_text()).into_response(),
        };
    }

    if let Some(dir) = &state.public_path {
        if method == Method::GET || method == Method::HEAD {
            match ServeDir::new(dir).oneshot(req).await {
                Ok(res) if res.status() != StatusCode::NOT_FOUND => return res.into_response(),
                Ok(_) => {}
                Err(e) => match e {},
            }
        }
    }

    not_found(method.as_str(), &path)
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);
    let channel = state.services.channels.open(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    state.join(&channel).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => state.dispatch_frame(&channel, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(channel = channel.id(), error = %e, "channel read failed");
                break;
            }
        }
    }

    state.leave(&channel).await;
    writer.abort();
}
