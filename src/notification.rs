//! Default `NotificationSink` implementations. The core only depends on
//! the `NotificationSink` trait (see `ports.rs`); this module supplies the
//! peripheral concrete sinks: structured logging via `tracing`, plus an
//! in-process broadcast bus for optional external consumers.

use crate::ports::{NotificationKind, NotificationSink};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{error, info};

pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn event(&self, kind: NotificationKind, payload: serde_json::Value) {
        match kind {
            NotificationKind::Error => error!(kind = ?kind, payload = %payload, "agent event"),
            _ => info!(kind = ?kind, payload = %payload, "agent event"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NotificationEvent {
    pub kind: String,
    pub payload: serde_json::Value,
}

pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<NotificationEvent>,
    inner: TracingNotificationSink,
}

impl BroadcastNotificationSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        BroadcastNotificationSink {
            tx,
            inner: TracingNotificationSink,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn event(&self, kind: NotificationKind, payload: serde_json::Value) {
        self.inner.event(kind, payload.clone()).await;
        let _ = self.tx.send(NotificationEvent {
            kind: format!("{:?}", kind),
            payload,
        });
    }
}
