//! Geofence evaluation for a single courier tracking session.
//!
//! A [`TrackingSession`] is owned by whoever drives a delivery's location stream.
//! All of its state (watched zones, the inside-set and dwell timers) is keyed by
//! zone id and private to the session, so sessions for different couriers never
//! share mutable state. Dwell timers are spawned tasks guarded by a
//! [`CancellationToken`]; leaving the zone, removing it or cleaning up the
//! session cancels the token before a stale dwell event can be recorded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{haversine_m, is_valid_coordinate, GeoPoint};
use crate::models::delivery::DeliveryStatus;
use crate::models::event::FulfillmentEvent;
use crate::models::geofence::{
    GeofenceEvent, GeofenceEventType, GeofenceZone, LocationSample, ZoneSpec, ZoneType,
};
use crate::models::order::Order;
use crate::notify::{dispatch, Notification, NotificationDispatcher};
use crate::observability::metrics::Metrics;
use crate::store::FulfillmentStore;

/// Collaborators a session needs; cheap to clone into dwell timer tasks.
#[derive(Clone)]
pub struct TrackingContext {
    pub store: Arc<dyn FulfillmentStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub events_tx: broadcast::Sender<FulfillmentEvent>,
    pub metrics: Metrics,
}

pub struct TrackingSession {
    ctx: TrackingContext,
    delivery_user_id: Uuid,
    assignment_id: Uuid,
    zones: BTreeMap<Uuid, GeofenceZone>,
    inside: HashSet<Uuid>,
    dwell_timers: HashMap<Uuid, CancellationToken>,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("delivery_user_id", &self.delivery_user_id)
            .field("assignment_id", &self.assignment_id)
            .finish_non_exhaustive()
    }
}

impl TrackingSession {
    pub fn new(ctx: TrackingContext, delivery_user_id: Uuid, assignment_id: Uuid) -> Self {
        Self {
            ctx,
            delivery_user_id,
            assignment_id,
            zones: BTreeMap::new(),
            inside: HashSet::new(),
            dwell_timers: HashMap::new(),
        }
    }

    /// Replaces the watched zones with the active zones of an order (and its restaurant).
    pub async fn load_order_zones(
        &mut self,
        order_id: Uuid,
        restaurant_id: Option<Uuid>,
    ) -> Result<usize, AppError> {
        let zones = self
            .ctx
            .store
            .active_zones_for_order(order_id, restaurant_id)
            .await?;

        self.cleanup();
        for zone in zones {
            self.zones.insert(zone.id, zone);
        }

        info!(
            assignment_id = %self.assignment_id,
            zones = self.zones.len(),
            "loaded geofence zones"
        );
        Ok(self.zones.len())
    }

    /// Creates a zone and starts watching it. Invalid input is logged and skipped.
    pub async fn add_zone(&mut self, spec: ZoneSpec) -> Option<Uuid> {
        let zone = create_zone(&self.ctx, spec).await?;
        let id = zone.id;
        self.zones.insert(id, zone);
        Some(id)
    }

    /// Deactivates a zone and stops watching it, cancelling any pending dwell timer.
    pub async fn remove_zone(&mut self, zone_id: Uuid) -> Result<bool, AppError> {
        let deactivated = self.ctx.store.deactivate_zone(zone_id).await?;
        self.forget_zone(zone_id);
        Ok(deactivated)
    }

    fn forget_zone(&mut self, zone_id: Uuid) {
        self.zones.remove(&zone_id);
        self.inside.remove(&zone_id);
        self.cancel_dwell(zone_id);
    }

    pub fn active_zones(&self) -> Vec<&GeofenceZone> {
        self.zones.values().collect()
    }

    pub fn entered_zones(&self) -> Vec<&GeofenceZone> {
        self.zones
            .values()
            .filter(|zone| self.inside.contains(&zone.id))
            .collect()
    }

    pub fn assignment_id(&self) -> Uuid {
        self.assignment_id
    }

    pub fn delivery_user_id(&self) -> Uuid {
        self.delivery_user_id
    }

    /// Evaluates one location sample against every watched zone and returns the
    /// transitions it caused.
    pub async fn check_sample(
        &mut self,
        lat: f64,
        lng: f64,
        accuracy: Option<f64>,
    ) -> Result<Vec<GeofenceEvent>, AppError> {
        if !is_valid_coordinate(lat, lng) {
            return Err(AppError::InvalidCoordinate { lat, lng });
        }

        self.record_location(lat, lng, accuracy).await;

        let point = GeoPoint::new(lat, lng);
        let mut transitions = Vec::new();
        for zone in self.zones.values() {
            let inside = haversine_m(&point, &zone.center()) <= zone.radius_meters;
            let was_inside = self.inside.contains(&zone.id);

            if inside && !was_inside {
                transitions.push((zone.clone(), GeofenceEventType::Enter));
            } else if !inside && was_inside {
                transitions.push((zone.clone(), GeofenceEventType::Exit));
            }
        }

        let mut events = Vec::with_capacity(transitions.len());
        for (zone, event_type) in transitions {
            match event_type {
                GeofenceEventType::Enter => {
                    self.inside.insert(zone.id);
                    if let Some(seconds) = zone.dwell_time_seconds() {
                        self.arm_dwell_timer(&zone, seconds, point, accuracy);
                    }
                }
                GeofenceEventType::Exit => {
                    self.inside.remove(&zone.id);
                    self.cancel_dwell(zone.id);
                }
                GeofenceEventType::Dwell => {}
            }

            let event = build_event(
                &zone,
                self.delivery_user_id,
                self.assignment_id,
                event_type,
                point,
                accuracy,
            );
            record_event(&self.ctx, event.clone()).await;
            notify_customer(&self.ctx, &zone, event_type).await;
            events.push(event);
        }

        Ok(events)
    }

    async fn record_location(&self, lat: f64, lng: f64, accuracy: Option<f64>) {
        let sample = LocationSample {
            assignment_id: self.assignment_id,
            delivery_user_id: self.delivery_user_id,
            latitude: lat,
            longitude: lng,
            accuracy,
            recorded_at: Utc::now(),
        };

        if let Err(err) = self.ctx.store.record_location(sample).await {
            let err = AppError::LocationUpdateFailed(err.to_string());
            warn!(
                assignment_id = %self.assignment_id,
                error = %err,
                "continuing tracking without persisted sample"
            );
        }
    }

    fn arm_dwell_timer(
        &mut self,
        zone: &GeofenceZone,
        seconds: f64,
        point: GeoPoint,
        accuracy: Option<f64>,
    ) {
        let Ok(delay) = Duration::try_from_secs_f64(seconds) else {
            warn!(zone_id = %zone.id, seconds, "unusable dwell time, timer not armed");
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = self.dwell_timers.insert(zone.id, token.clone()) {
            previous.cancel();
        }

        let ctx = self.ctx.clone();
        let zone = zone.clone();
        let delivery_user_id = self.delivery_user_id;
        let assignment_id = self.assignment_id;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(zone_id = %zone.id, "dwell timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if token.is_cancelled() {
                        return;
                    }
                    let mut event = build_event(
                        &zone,
                        delivery_user_id,
                        assignment_id,
                        GeofenceEventType::Dwell,
                        point,
                        accuracy,
                    );
                    event.metadata.insert("dwell_time".to_string(), json!(seconds));
                    record_event(&ctx, event).await;
                }
            }
        });
    }

    fn cancel_dwell(&mut self, zone_id: Uuid) {
        if let Some(token) = self.dwell_timers.remove(&zone_id) {
            token.cancel();
        }
    }

    /// Cancels every timer and forgets all zones and memberships.
    pub fn cleanup(&mut self) {
        for (_, token) in self.dwell_timers.drain() {
            token.cancel();
        }
        self.inside.clear();
        self.zones.clear();
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        for token in self.dwell_timers.values() {
            token.cancel();
        }
    }
}

/// Stores a new active zone. Bad coordinates or radius skip the zone without failing.
pub async fn create_zone(ctx: &TrackingContext, spec: ZoneSpec) -> Option<GeofenceZone> {
    if !is_valid_coordinate(spec.latitude, spec.longitude) {
        let err = AppError::InvalidCoordinate {
            lat: spec.latitude,
            lng: spec.longitude,
        };
        warn!(
            zone_name = %spec.name,
            zone_type = spec.zone_type.as_str(),
            error = %err,
            "skipping geofence zone"
        );
        return None;
    }
    if !spec.radius_meters.is_finite() || spec.radius_meters <= 0.0 {
        warn!(
            zone_name = %spec.name,
            radius_meters = spec.radius_meters,
            "skipping geofence zone with unusable radius"
        );
        return None;
    }

    let zone = GeofenceZone::from_spec(spec);
    if let Err(err) = ctx.store.insert_zone(zone.clone()).await {
        error!(zone_name = %zone.name, error = %err, "failed to store geofence zone");
        return None;
    }

    info!(
        zone_id = %zone.id,
        zone_name = %zone.name,
        zone_type = zone.zone_type.as_str(),
        "geofence zone created"
    );
    Some(zone)
}

/// Pickup zone around the restaurant and delivery zone around the customer.
/// Never fails; a zone with bad coordinates is skipped on its own.
pub async fn create_order_zones(
    ctx: &TrackingContext,
    order: &Order,
    pickup: Option<GeoPoint>,
    pickup_radius_m: f64,
    delivery_radius_m: f64,
) -> Vec<GeofenceZone> {
    let mut created = Vec::new();

    match pickup {
        Some(location) => {
            let spec = ZoneSpec {
                name: format!("Pickup Zone - Order {}", order.id),
                zone_type: ZoneType::Pickup,
                latitude: location.lat,
                longitude: location.lng,
                radius_meters: pickup_radius_m,
                order_id: Some(order.id),
                restaurant_id: order.restaurant_id,
                metadata: tracking_metadata(order.id, "pickup_tracking"),
            };
            created.extend(create_zone(ctx, spec).await);
        }
        None => warn!(order_id = %order.id, "no pickup location, skipping pickup zone"),
    }

    let spec = ZoneSpec {
        name: format!("Delivery Zone - Order {}", order.id),
        zone_type: ZoneType::Delivery,
        latitude: order.customer_location.lat,
        longitude: order.customer_location.lng,
        radius_meters: delivery_radius_m,
        order_id: Some(order.id),
        restaurant_id: None,
        metadata: tracking_metadata(order.id, "delivery_tracking"),
    };
    created.extend(create_zone(ctx, spec).await);

    created
}

fn tracking_metadata(order_id: Uuid, created_for: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("order_id".to_string(), json!(order_id));
    metadata.insert("created_for".to_string(), json!(created_for));
    metadata
}

/// Customer-facing copy per zone type and transition. Anything not listed is silent.
pub fn notification_copy(
    zone_type: ZoneType,
    event_type: GeofenceEventType,
) -> Option<(&'static str, &'static str)> {
    match (zone_type, event_type) {
        (ZoneType::Pickup, GeofenceEventType::Enter) => Some((
            "Driver at Restaurant",
            "Your driver has arrived at the restaurant to pick up your order.",
        )),
        (ZoneType::Pickup, GeofenceEventType::Exit) => Some((
            "Order Picked Up",
            "Your order has been picked up and is on the way to you!",
        )),
        (ZoneType::Delivery, GeofenceEventType::Enter) => Some((
            "Driver Nearby",
            "Your driver is approaching your delivery location.",
        )),
        _ => None,
    }
}

/// Stage a transition hints at. Never applied to a delivery automatically.
pub fn advisory_stage(zone_type: ZoneType, event_type: GeofenceEventType) -> Option<DeliveryStatus> {
    match (zone_type, event_type) {
        (ZoneType::Pickup, GeofenceEventType::Exit) => Some(DeliveryStatus::PickedUp),
        (ZoneType::Delivery, GeofenceEventType::Enter) => Some(DeliveryStatus::OnTheWay),
        (ZoneType::Delivery, GeofenceEventType::Dwell) => Some(DeliveryStatus::Delivered),
        _ => None,
    }
}

fn build_event(
    zone: &GeofenceZone,
    delivery_user_id: Uuid,
    assignment_id: Uuid,
    event_type: GeofenceEventType,
    point: GeoPoint,
    accuracy: Option<f64>,
) -> GeofenceEvent {
    let mut metadata = Map::new();
    metadata.insert("zone_name".to_string(), json!(zone.name));
    metadata.insert("zone_type".to_string(), json!(zone.zone_type.as_str()));

    GeofenceEvent {
        id: Uuid::new_v4(),
        zone_id: zone.id,
        delivery_user_id,
        assignment_id,
        event_type,
        latitude: point.lat,
        longitude: point.lng,
        accuracy,
        timestamp: Utc::now(),
        metadata,
        advisory_stage: advisory_stage(zone.zone_type, event_type),
    }
}

async fn record_event(ctx: &TrackingContext, event: GeofenceEvent) {
    info!(
        zone_id = %event.zone_id,
        assignment_id = %event.assignment_id,
        event_type = event.event_type.as_str(),
        "geofence transition"
    );

    ctx.metrics
        .geofence_events_total
        .with_label_values(&[event.event_type.as_str()])
        .inc();

    if let Err(err) = ctx.store.append_geofence_event(event.clone()).await {
        error!(zone_id = %event.zone_id, error = %err, "failed to persist geofence event");
    }

    let _ = ctx.events_tx.send(FulfillmentEvent::Geofence { event });
}

async fn notify_customer(ctx: &TrackingContext, zone: &GeofenceZone, event_type: GeofenceEventType) {
    let Some(order_id) = zone.order_id else {
        return;
    };
    let Some((title, message)) = notification_copy(zone.zone_type, event_type) else {
        return;
    };

    let mut metadata = Map::new();
    metadata.insert("zone_id".to_string(), json!(zone.id));
    metadata.insert("zone_type".to_string(), json!(zone.zone_type.as_str()));
    metadata.insert("event_type".to_string(), json!(event_type.as_str()));

    dispatch(
        ctx.notifier.as_ref(),
        Notification {
            order_id,
            kind: format!("geofence_{}", event_type.as_str()),
            title: title.to_string(),
            message: message.to_string(),
            metadata,
        },
    )
    .await;
}
