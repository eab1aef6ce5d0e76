use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::courier::{Courier, CourierStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/couriers", post(create_courier).get(list_couriers))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub location: GeoPoint,
    pub capacity: u8,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    if payload.capacity == 0 {
        return Err(AppError::BadRequest("capacity must be > 0".to_string()));
    }

    if !payload.location.is_valid() {
        return Err(AppError::InvalidCoordinate {
            lat: payload.location.lat,
            lng: payload.location.lng,
        });
    }

    let courier = Courier {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        capacity: payload.capacity,
        current_load: 0,
        status: CourierStatus::Available,
        updated_at: Utc::now(),
    };

    state.store.insert_courier(courier.clone()).await?;
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.store.list_couriers().await?))
}
