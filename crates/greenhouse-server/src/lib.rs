//! Greenhouse monitoring server
//!
//! Modules register HTTP and channel endpoints plus scheduled tasks with the
//! [`Application`], which serves them over axum and a WebSocket at `/ws`.

pub mod app;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod module;
pub mod modules;
pub mod query;
pub mod task;

pub use app::{AppState, Application};
pub use channel::{Channel, ChannelHub, OutboundFrame, CHANNEL_CAPACITY};
pub use endpoint::{Endpoint, EndpointKind, EndpointList, Method};
pub use error::{ApiError, ApiResult};
pub use module::{Joinable, Module, Services};
pub use query::Params;
pub use task::{Task, TaskOptions, TaskPool, TaskSchedule};
