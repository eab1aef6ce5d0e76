//! Customer/courier-facing notification seam.
//!
//! Delivery of a notification is fire-and-forget from the orchestrator's point of
//! view: [`dispatch`] logs failures and never hands them back to the caller.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::FulfillmentEvent;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub order_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), AppError>;
}

/// Sends a notification and swallows any failure after logging it.
pub async fn dispatch(notifier: &dyn NotificationDispatcher, notification: Notification) {
    let order_id = notification.order_id;
    let kind = notification.kind.clone();

    if let Err(err) = notifier.notify(notification).await {
        warn!(order_id = %order_id, kind = %kind, error = %err, "notification dispatch failed");
    }
}

/// Publishes notifications onto the live event stream.
pub struct ChannelNotifier {
    events_tx: broadcast::Sender<FulfillmentEvent>,
}

impl ChannelNotifier {
    pub fn new(events_tx: broadcast::Sender<FulfillmentEvent>) -> Self {
        Self { events_tx }
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), AppError> {
        info!(
            order_id = %notification.order_id,
            kind = %notification.kind,
            title = %notification.title,
            "customer notification"
        );

        if self
            .events_tx
            .send(FulfillmentEvent::Notification { notification })
            .is_err()
        {
            debug!("no live subscribers for notification");
        }
        Ok(())
    }
}
