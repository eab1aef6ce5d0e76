use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::arbiter::{accept, reject, RejectOutcome};
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::restaurant_assignment::RestaurantAssignment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/restaurant-assignments/:id", get(get_assignment))
        .route("/restaurant-assignments/:id/accept", post(accept_assignment))
        .route("/restaurant-assignments/:id/reject", post(reject_assignment))
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub restaurant_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct AcceptResponse {
    pub assignment: RestaurantAssignment,
    pub order: Order,
    pub cancelled_assignments: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct RejectResponse {
    pub assignment: RestaurantAssignment,
    pub race: RejectOutcome,
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RestaurantAssignment>, AppError> {
    let assignment = state
        .store
        .get_restaurant_assignment(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("restaurant assignment {} not found", id)))?;
    Ok(Json(assignment))
}

async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<AcceptResponse>, AppError> {
    let acceptance = accept(&state, id, payload.restaurant_id).await?;
    Ok(Json(AcceptResponse {
        assignment: acceptance.assignment,
        order: acceptance.order,
        cancelled_assignments: acceptance.cancelled,
    }))
}

async fn reject_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<RejectRequest>>,
) -> Result<Json<RejectResponse>, AppError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    let race = reject(&state, id, payload.reason).await?;

    let assignment = state
        .store
        .get_restaurant_assignment(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("restaurant assignment {} not found", id)))?;
    Ok(Json(RejectResponse { assignment, race }))
}
