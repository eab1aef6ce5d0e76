use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::geofence::{create_order_zones, TrackingSession};
use crate::error::AppError;
use crate::geo::{checked_distance_km, GeoPoint};
use crate::models::delivery::{DeliveryAssignment, DeliveryChange, DeliveryStatus};
use crate::models::event::FulfillmentEvent;
use crate::models::geofence::{GeofenceEvent, GeofenceZone};
use crate::models::order::OrderStatus;
use crate::state::AppState;

const PICKUP_OVERHEAD_MINUTES: f64 = 5.0;
const MINUTES_PER_KM: f64 = 3.0;
const TRAFFIC_BUFFER_MINUTES: f64 = 5.0;
const FALLBACK_ETA_MINUTES: i64 = 30;
const DEFAULT_REJECT_REASON: &str = "declined by courier";

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub delivery: DeliveryAssignment,
    pub zones: Vec<GeofenceZone>,
}

/// Binds a courier to an order whose restaurant has accepted, and sets up its geofences.
pub async fn attach_courier(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
) -> Result<Attachment, AppError> {
    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status != OrderStatus::RestaurantAccepted {
        return Err(AppError::InvalidTransition(format!(
            "order {order_id} is {:?}, a courier needs an accepted order",
            order.status
        )));
    }

    let courier = state.store.reserve_courier(courier_id).await?;

    let delivery = DeliveryAssignment::new(order_id, courier.id);
    match state
        .store
        .insert_delivery_if_none_active(delivery.clone())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            release_slot(state, courier.id).await;
            warn!(order_id = %order_id, courier_id = %courier.id, "order already has a courier");
            return Err(AppError::NotPending(format!(
                "order {order_id} already has an active delivery"
            )));
        }
        Err(err) => {
            release_slot(state, courier.id).await;
            return Err(err);
        }
    }

    let pickup = match order.restaurant_id {
        Some(restaurant_id) => state
            .store
            .get_restaurant(restaurant_id)
            .await?
            .map(|restaurant| restaurant.location),
        None => None,
    };

    let zones = create_order_zones(
        &state.tracking_context(),
        &order,
        pickup,
        state.config.pickup_zone_radius_m,
        state.config.delivery_zone_radius_m,
    )
    .await;

    info!(
        order_id = %order_id,
        delivery_id = %delivery.id,
        courier_id = %courier.id,
        zones = zones.len(),
        "courier attached to order"
    );

    Ok(Attachment { delivery, zones })
}

/// Moves a delivery to `target` on behalf of `actor_id`.
pub async fn transition(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
    target: DeliveryStatus,
) -> Result<DeliveryAssignment, AppError> {
    match target {
        DeliveryStatus::PickedUp => pickup(state, assignment_id, actor_id).await,
        DeliveryStatus::OnTheWay => start_to_customer(state, assignment_id, actor_id).await,
        DeliveryStatus::Delivered => complete(state, assignment_id, actor_id).await,
        DeliveryStatus::Cancelled => cancel(state, assignment_id, actor_id, None).await,
        DeliveryStatus::Assigned => Err(AppError::InvalidTransition(format!(
            "delivery {assignment_id} cannot move back to assigned"
        ))),
    }
}

pub async fn pickup(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
) -> Result<DeliveryAssignment, AppError> {
    advance(state, assignment_id, actor_id, DeliveryStatus::PickedUp, None).await
}

pub async fn start_to_customer(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
) -> Result<DeliveryAssignment, AppError> {
    advance(state, assignment_id, actor_id, DeliveryStatus::OnTheWay, None).await
}

pub async fn complete(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
) -> Result<DeliveryAssignment, AppError> {
    let delivery = advance(state, assignment_id, actor_id, DeliveryStatus::Delivered, None).await?;
    release(state, &delivery).await;
    Ok(delivery)
}

/// Courier cancels an assigned job. The courier keeps its slot and the order status is
/// left for the caller to settle.
pub async fn cancel(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
    reason: Option<String>,
) -> Result<DeliveryAssignment, AppError> {
    advance(state, assignment_id, actor_id, DeliveryStatus::Cancelled, reason).await
}

/// Courier declines an assigned job; the job slot is given back.
pub async fn reject(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
    reason: Option<String>,
) -> Result<DeliveryAssignment, AppError> {
    let reason = reason.unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
    let delivery = advance(
        state,
        assignment_id,
        actor_id,
        DeliveryStatus::Cancelled,
        Some(reason),
    )
    .await?;
    release(state, &delivery).await;
    Ok(delivery)
}

async fn advance(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
    target: DeliveryStatus,
    reason: Option<String>,
) -> Result<DeliveryAssignment, AppError> {
    let current = state
        .store
        .get_delivery(assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {assignment_id} not found")))?;

    if current.delivery_user_id != actor_id {
        warn!(
            delivery_id = %assignment_id,
            actor_id = %actor_id,
            "transition attempted by another courier"
        );
        return Err(AppError::Unauthorized(format!(
            "courier {actor_id} does not own delivery {assignment_id}"
        )));
    }

    let Some(expected) = target.predecessor() else {
        return Err(AppError::InvalidTransition(format!(
            "delivery {assignment_id} cannot move to {}",
            target.as_str()
        )));
    };
    if current.status != expected {
        return Err(AppError::InvalidTransition(format!(
            "delivery {assignment_id} is {}, {} needs {}",
            current.status.as_str(),
            target.as_str(),
            expected.as_str()
        )));
    }

    let change = DeliveryChange {
        status: target,
        at: Utc::now(),
        cancellation_reason: reason,
    };
    let rows = state
        .store
        .update_delivery_if(assignment_id, expected, change)
        .await?;
    if rows == 0 {
        return Err(AppError::InvalidTransition(format!(
            "delivery {assignment_id} moved on concurrently"
        )));
    }

    let delivery = state
        .store
        .get_delivery(assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {assignment_id} not found")))?;

    if let Some(order_status) = target.order_status() {
        if let Err(err) = state
            .store
            .set_order_status(delivery.order_id, order_status)
            .await
        {
            error!(
                order_id = %delivery.order_id,
                delivery_id = %assignment_id,
                error = %err,
                "failed to mirror delivery stage onto order"
            );
        }
    }

    state
        .metrics
        .delivery_transitions_total
        .with_label_values(&[target.as_str()])
        .inc();

    info!(
        delivery_id = %assignment_id,
        order_id = %delivery.order_id,
        status = target.as_str(),
        "delivery transitioned"
    );

    state.publish(FulfillmentEvent::DeliveryTransition {
        assignment: delivery.clone(),
    });

    if target.is_terminal() {
        teardown(state, &delivery).await;
    }

    Ok(delivery)
}

async fn teardown(state: &AppState, delivery: &DeliveryAssignment) {
    match state.store.deactivate_order_zones(delivery.order_id).await {
        Ok(zones) if !zones.is_empty() => {
            info!(order_id = %delivery.order_id, zones = zones.len(), "order zones deactivated");
        }
        Ok(_) => {}
        Err(err) => {
            error!(order_id = %delivery.order_id, error = %err, "failed to deactivate order zones");
        }
    }
    state.end_tracking(delivery.id).await;
}

async fn release(state: &AppState, delivery: &DeliveryAssignment) {
    release_slot(state, delivery.delivery_user_id).await;
}

async fn release_slot(state: &AppState, courier_id: Uuid) {
    if let Err(err) = state.store.release_courier(courier_id).await {
        error!(courier_id = %courier_id, error = %err, "failed to release courier");
    }
}

/// Travel estimate in minutes: fixed pickup overhead, per-km time and a traffic buffer.
pub fn eta_minutes(distance_km: f64) -> f64 {
    PICKUP_OVERHEAD_MINUTES + MINUTES_PER_KM * distance_km + TRAFFIC_BUFFER_MINUTES
}

/// Best-effort ETA from the courier's position to the customer. Falls back to
/// thirty minutes out instead of failing.
pub async fn estimate_delivery_time(
    state: &AppState,
    assignment_id: Uuid,
    from: GeoPoint,
) -> Result<DeliveryAssignment, AppError> {
    estimate_delivery_time_at(state, assignment_id, from, Utc::now()).await
}

pub async fn estimate_delivery_time_at(
    state: &AppState,
    assignment_id: Uuid,
    from: GeoPoint,
    now: DateTime<Utc>,
) -> Result<DeliveryAssignment, AppError> {
    let delivery = state
        .store
        .get_delivery(assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {assignment_id} not found")))?;

    let destination = match state.store.get_order(delivery.order_id).await {
        Ok(order) => order.map(|order| order.customer_location),
        Err(err) => {
            warn!(order_id = %delivery.order_id, error = %err, "order lookup failed for eta");
            None
        }
    };

    let distance = destination.and_then(|to| checked_distance_km(&from, &to));
    let (eta, distance_km) = match distance {
        Some(km) => {
            let millis = (eta_minutes(km) * 60_000.0).round() as i64;
            (now + Duration::milliseconds(millis), Some(km))
        }
        None => {
            warn!(delivery_id = %assignment_id, "distance unavailable, using fallback eta");
            (now + Duration::minutes(FALLBACK_ETA_MINUTES), None)
        }
    };

    state
        .store
        .set_delivery_estimate(assignment_id, eta, distance_km)
        .await
}

/// Feeds one courier location sample into the delivery's tracking session,
/// starting the session on first use.
pub async fn track_location(
    state: &AppState,
    assignment_id: Uuid,
    actor_id: Uuid,
    lat: f64,
    lng: f64,
    accuracy: Option<f64>,
) -> Result<Vec<GeofenceEvent>, AppError> {
    let delivery = state
        .store
        .get_delivery(assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {assignment_id} not found")))?;

    if delivery.delivery_user_id != actor_id {
        return Err(AppError::Unauthorized(format!(
            "courier {actor_id} does not own delivery {assignment_id}"
        )));
    }
    if delivery.status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "delivery {assignment_id} is {} and no longer tracked",
            delivery.status.as_str()
        )));
    }

    let session = tracking_session(state, &delivery).await?;
    let mut session = session.lock().await;
    session.check_sample(lat, lng, accuracy).await
}

async fn tracking_session(
    state: &AppState,
    delivery: &DeliveryAssignment,
) -> Result<Arc<Mutex<TrackingSession>>, AppError> {
    if let Some(existing) = state.sessions.get(&delivery.id) {
        return Ok(existing.value().clone());
    }

    let restaurant_id = state
        .store
        .get_order(delivery.order_id)
        .await?
        .and_then(|order| order.restaurant_id);

    let mut session = TrackingSession::new(
        state.tracking_context(),
        delivery.delivery_user_id,
        delivery.id,
    );
    session.load_order_zones(delivery.order_id, restaurant_id).await?;

    let (session, inserted) = match state.sessions.entry(delivery.id) {
        Entry::Occupied(entry) => (entry.get().clone(), false),
        Entry::Vacant(entry) => {
            state.metrics.active_tracking_sessions.inc();
            (entry.insert(Arc::new(Mutex::new(session))).value().clone(), true)
        }
    };

    // Terminal transitions write the status before ending tracking, so a session
    // inserted after that teardown is caught here.
    if inserted {
        let current = state.store.get_delivery(delivery.id).await?;
        if current.map_or(true, |current| current.status.is_terminal()) {
            state.end_tracking(delivery.id).await;
            return Err(AppError::InvalidTransition(format!(
                "delivery {} finished while tracking started",
                delivery.id
            )));
        }
    }
    Ok(session)
}
