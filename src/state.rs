use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::geofence::{TrackingContext, TrackingSession};
use crate::models::event::FulfillmentEvent;
use crate::notify::{ChannelNotifier, NotificationDispatcher};
use crate::observability::metrics::Metrics;
use crate::store::{FulfillmentStore, MemoryStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn FulfillmentStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub events_tx: broadcast::Sender<FulfillmentEvent>,
    /// Live tracking sessions keyed by delivery assignment id.
    pub sessions: DashMap<Uuid, Arc<Mutex<TrackingSession>>>,
    pub metrics: Metrics,
}

impl AppState {
    /// In-memory store, notifications published on the live event stream.
    pub fn new(config: Config) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));
        let notifier = Arc::new(ChannelNotifier::new(events_tx.clone()));

        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            notifier,
            events_tx,
            sessions: DashMap::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn FulfillmentStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        Self {
            config,
            store,
            notifier,
            events_tx,
            sessions: DashMap::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn publish(&self, event: FulfillmentEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("no live subscribers for fulfillment event");
        }
    }

    pub fn tracking_context(&self) -> TrackingContext {
        TrackingContext {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            events_tx: self.events_tx.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Drops the tracking session for a delivery, cancelling its dwell timers.
    pub async fn end_tracking(&self, assignment_id: Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(&assignment_id) else {
            return false;
        };
        session.lock().await.cleanup();
        self.metrics.active_tracking_sessions.dec();
        true
    }
}
