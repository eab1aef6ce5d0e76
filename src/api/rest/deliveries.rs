use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::delivery::{estimate_delivery_time, reject, track_location, transition};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::delivery::{DeliveryAssignment, DeliveryStatus};
use crate::models::geofence::GeofenceEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/transition", post(transition_delivery))
        .route("/deliveries/:id/reject", post(reject_delivery))
        .route("/deliveries/:id/eta", post(estimate_eta))
        .route("/deliveries/:id/locations", post(report_location))
        .route("/deliveries/:id/geofence-events", get(list_geofence_events))
        .route("/deliveries/:id/tracking", delete(stop_tracking))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub actor_id: Uuid,
    pub target_stage: DeliveryStatus,
}

#[derive(Deserialize)]
pub struct RejectDeliveryRequest {
    pub actor_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct EtaRequest {
    pub from: GeoPoint,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub actor_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Serialize)]
pub struct LocationResponse {
    pub events: Vec<GeofenceEvent>,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub delivery_id: Uuid,
    pub stopped: bool,
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    let delivery = state
        .store
        .get_delivery(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))?;
    Ok(Json(delivery))
}

async fn transition_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    let delivery = transition(&state, id, payload.actor_id, payload.target_stage).await?;
    Ok(Json(delivery))
}

async fn reject_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectDeliveryRequest>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    let delivery = reject(&state, id, payload.actor_id, payload.reason).await?;
    Ok(Json(delivery))
}

async fn estimate_eta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EtaRequest>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    Ok(Json(estimate_delivery_time(&state, id, payload.from).await?))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<LocationResponse>, AppError> {
    let events = track_location(
        &state,
        id,
        payload.actor_id,
        payload.latitude,
        payload.longitude,
        payload.accuracy,
    )
    .await?;
    Ok(Json(LocationResponse { events }))
}

async fn list_geofence_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<GeofenceEvent>>, AppError> {
    Ok(Json(state.store.list_geofence_events(id).await?))
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<TrackingResponse> {
    let stopped = state.end_tracking(id).await;
    Json(TrackingResponse {
        delivery_id: id,
        stopped,
    })
}
