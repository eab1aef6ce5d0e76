use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{checked_distance_km, GeoPoint};
use crate::models::order::OrderItem;
use crate::models::restaurant::{normalize_item_name, Restaurant};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub restaurant_id: Uuid,
    pub name: String,
    pub distance_km: f64,
    pub location: GeoPoint,
}

/// Restaurants within `radius_km` of `location` that stock every item, nearest first.
pub async fn find_candidates(
    state: &AppState,
    items: &[OrderItem],
    location: &GeoPoint,
    radius_km: Option<f64>,
) -> Result<Vec<Candidate>, AppError> {
    if !location.is_valid() {
        return Err(AppError::InvalidCoordinate {
            lat: location.lat,
            lng: location.lng,
        });
    }

    let radius_km = resolve_radius(
        radius_km,
        state.config.candidate_radius_km,
        state.config.max_candidate_radius_km,
    )?;

    let restaurants = state.store.list_restaurants().await?;
    let candidates = rank_candidates(&restaurants, items, location, radius_km);

    debug!(
        radius_km,
        scanned = restaurants.len(),
        matched = candidates.len(),
        "candidate search finished"
    );

    Ok(candidates)
}

pub fn resolve_radius(requested: Option<f64>, default_km: f64, ceiling_km: f64) -> Result<f64, AppError> {
    let radius = requested.unwrap_or(default_km);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(AppError::BadRequest(format!(
            "search radius must be a positive number of km, got {radius}"
        )));
    }
    if radius > ceiling_km {
        warn!(requested_km = radius, ceiling_km, "search radius clamped to ceiling");
        return Ok(ceiling_km);
    }
    Ok(radius)
}

pub fn rank_candidates(
    restaurants: &[Restaurant],
    items: &[OrderItem],
    location: &GeoPoint,
    radius_km: f64,
) -> Vec<Candidate> {
    let required = required_quantities(items);

    let mut candidates: Vec<Candidate> = restaurants
        .iter()
        .filter(|restaurant| restaurant.is_active && stocks_all(restaurant, &required))
        .filter_map(|restaurant| {
            let distance_km = checked_distance_km(location, &restaurant.location)?;
            (distance_km <= radius_km).then(|| Candidate {
                restaurant_id: restaurant.id,
                name: restaurant.name.clone(),
                distance_km,
                location: restaurant.location,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.restaurant_id.cmp(&b.restaurant_id))
    });
    candidates
}

/// Duplicate lines for the same item are summed.
fn required_quantities(items: &[OrderItem]) -> HashMap<String, u64> {
    let mut required = HashMap::new();
    for item in items {
        *required.entry(normalize_item_name(&item.name)).or_insert(0) += u64::from(item.quantity);
    }
    required
}

fn stocks_all(restaurant: &Restaurant, required: &HashMap<String, u64>) -> bool {
    required.iter().all(|(name, quantity)| {
        restaurant
            .menu_item(name)
            .is_some_and(|item| u64::from(item.available_quantity) >= *quantity)
    })
}
