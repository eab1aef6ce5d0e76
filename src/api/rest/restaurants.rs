use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::restaurant::{MenuItem, Restaurant};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/restaurants", post(create_restaurant).get(list_restaurants))
}

#[derive(Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
    pub location: GeoPoint,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

fn default_active() -> bool {
    true
}

async fn create_restaurant(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<Restaurant>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if !payload.location.is_valid() {
        return Err(AppError::InvalidCoordinate {
            lat: payload.location.lat,
            lng: payload.location.lng,
        });
    }
    if let Some(item) = payload.menu.iter().find(|item| !item.prep.is_valid()) {
        return Err(AppError::BadRequest(format!(
            "menu item {} needs non-negative prep minutes and a positive complexity multiplier",
            item.name
        )));
    }

    let restaurant = Restaurant {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        is_active: payload.is_active,
        menu: payload.menu,
    };

    state.store.insert_restaurant(restaurant.clone()).await?;
    Ok((StatusCode::CREATED, Json(restaurant)))
}

async fn list_restaurants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Restaurant>>, AppError> {
    Ok(Json(state.store.list_restaurants().await?))
}
