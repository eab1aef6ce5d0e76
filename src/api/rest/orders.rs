use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::MAX_ASSIGNMENT_TTL_MINUTES;
use crate::engine::arbiter::cancel_broadcast;
use crate::engine::broadcast::{dispatch_order, DispatchReport};
use crate::engine::candidates::{find_candidates, Candidate};
use crate::engine::delivery::{attach_courier, Attachment};
use crate::engine::preparation::{estimate_prep_time, PrepEstimate};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::order::{Order, OrderItem};
use crate::models::restaurant_assignment::RestaurantAssignment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/candidates", get(list_candidates))
        .route("/orders/:id/broadcast", post(rebroadcast))
        .route("/orders/:id/cancel", post(cancel_order_broadcast))
        .route("/orders/:id/assignments", get(list_assignments))
        .route("/orders/:id/prep-estimate", get(prep_estimate))
        .route("/orders/:id/delivery", post(attach_delivery))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItem>,
    pub customer_location: GeoPoint,
    pub radius_km: Option<f64>,
    pub ttl_minutes: Option<i64>,
}

#[derive(Serialize)]
pub struct CreateOrderResponse {
    pub order: Order,
    pub dispatch: Option<DispatchReport>,
}

#[derive(Deserialize, Default)]
pub struct BroadcastRequest {
    pub radius_km: Option<f64>,
    pub ttl_minutes: Option<i64>,
}

#[derive(Deserialize)]
pub struct RadiusQuery {
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct PrepQuery {
    pub restaurant_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub order_id: Uuid,
    pub cancelled_assignments: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct AttachCourierRequest {
    pub courier_id: Uuid,
}

fn ttl_from(minutes: Option<i64>) -> Result<Option<Duration>, AppError> {
    match minutes {
        Some(minutes) if minutes <= 0 => Err(AppError::BadRequest(
            "ttl_minutes must be positive".to_string(),
        )),
        Some(minutes) if minutes > MAX_ASSIGNMENT_TTL_MINUTES => Err(AppError::BadRequest(
            format!("ttl_minutes must be at most {MAX_ASSIGNMENT_TTL_MINUTES}"),
        )),
        Some(minutes) => Duration::try_minutes(minutes)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest("ttl_minutes is out of range".to_string())),
        None => Ok(None),
    }
}

async fn load_order(state: &AppState, id: Uuid) -> Result<Order, AppError> {
    state
        .store
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("order needs at least one item".to_string()));
    }
    if payload.items.iter().any(|item| item.quantity == 0) {
        return Err(AppError::BadRequest("item quantity must be > 0".to_string()));
    }
    if !payload.customer_location.is_valid() {
        return Err(AppError::InvalidCoordinate {
            lat: payload.customer_location.lat,
            lng: payload.customer_location.lng,
        });
    }
    let ttl = ttl_from(payload.ttl_minutes)?;

    let order = Order::new(payload.items, payload.customer_location);
    state.store.insert_order(order.clone()).await?;

    let dispatch = match dispatch_order(&state, order.id, payload.radius_km, ttl).await {
        Ok(report) => Some(report),
        Err(AppError::NoCandidates(order_id)) => {
            warn!(order_id = %order_id, "order created without candidate restaurants");
            None
        }
        Err(err) => return Err(err),
    };

    let order = load_order(&state, order.id).await?;
    Ok((StatusCode::CREATED, Json(CreateOrderResponse { order, dispatch })))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(load_order(&state, id).await?))
}

async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RadiusQuery>,
) -> Result<Json<Vec<Candidate>>, AppError> {
    let order = load_order(&state, id).await?;
    let candidates =
        find_candidates(&state, &order.items, &order.customer_location, query.radius_km).await?;
    Ok(Json(candidates))
}

async fn rebroadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<BroadcastRequest>>,
) -> Result<Json<DispatchReport>, AppError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    let ttl = ttl_from(payload.ttl_minutes)?;
    Ok(Json(dispatch_order(&state, id, payload.radius_km, ttl).await?))
}

async fn cancel_order_broadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled_assignments = cancel_broadcast(&state, id).await?;
    Ok(Json(CancelResponse {
        order_id: id,
        cancelled_assignments,
    }))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RestaurantAssignment>>, AppError> {
    load_order(&state, id).await?;
    Ok(Json(state.store.list_restaurant_assignments(id).await?))
}

async fn prep_estimate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PrepQuery>,
) -> Result<Json<PrepEstimate>, AppError> {
    let order = load_order(&state, id).await?;
    let restaurant_id = query
        .restaurant_id
        .or(order.restaurant_id)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "order {id} has no restaurant yet, pass restaurant_id"
            ))
        })?;

    Ok(Json(estimate_prep_time(&state, &order.items, restaurant_id).await?))
}

async fn attach_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AttachCourierRequest>,
) -> Result<(StatusCode, Json<Attachment>), AppError> {
    let attachment = attach_courier(&state, id, payload.courier_id).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}
