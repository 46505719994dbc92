//! Connected message channels
//!
//! Each WebSocket connection is registered in the [`ChannelHub`] as a
//! [`Channel`]: an id plus the sending half of the queue drained by the
//! connection's writer task.

use crate::error::ApiError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub type ChannelId = u64;

/// Frames queued for one connection before new ones are dropped
pub const CHANNEL_CAPACITY: usize = 64;

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundFrame {
    Event { event: String, data: Value },
    Response { path: String, data: Value },
    Error {
        path: String,
        error: String,
        message: String,
    },
}

impl OutboundFrame {
    pub fn error(path: impl Into<String>, err: &ApiError) -> Self {
        OutboundFrame::Error {
            path: path.into(),
            error: err.tag().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    tx: mpsc::Sender<OutboundFrame>,
}

impl Channel {
    pub fn new(id: ChannelId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a frame; false when the connection is gone or its queue is full
    pub fn send(&self, frame: OutboundFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(channel = self.id, "channel queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn emit(&self, event: impl Into<String>, data: Value) -> bool {
        self.send(OutboundFrame::Event {
            event: event.into(),
            data,
        })
    }

    pub fn reply(&self, path: impl Into<String>, data: Value) -> bool {
        self.send(OutboundFrame::Response {
            path: path.into(),
            data,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelHub {
    channels: Arc<RwLock<HashMap<ChannelId, Channel>>>,
    counter: Arc<AtomicU64>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new channel fed by `tx`
    pub async fn open(&self, tx: mpsc::Sender<OutboundFrame>) -> Channel {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::new(id, tx);
        self.channels.write().await.insert(id, channel.clone());
        debug!(channel = id, "channel opened");
        channel
    }

    pub async fn close(&self, id: ChannelId) -> Option<Channel> {
        let removed = self.channels.write().await.remove(&id);
        debug!(channel = id, "channel closed");
        removed
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Send an event to every open channel, returns how many accepted it
    pub async fn broadcast(&self, event: &str, data: Value) -> usize {
        let channels = self.channels.read().await;
        let delivered = channels
            .values()
            .filter(|channel| channel.emit(event, data.clone()))
            .count();
        debug!(event, delivered, "event broadcast");
        delivered
    }
}
