use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::candidates::Candidate;
use crate::geo::GeoPoint;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::order::{Order, OrderItem};
use crate::models::restaurant::{MenuItem, PrepProfile, Restaurant};
use crate::state::AppState;

pub const CUSTOMER: GeoPoint = GeoPoint {
    lat: 52.52,
    lng: 13.405,
};

pub fn test_state() -> AppState {
    AppState::new(Config::default())
}

pub fn candidate(id_seed: u128) -> Candidate {
    Candidate {
        restaurant_id: Uuid::from_u128(id_seed),
        name: format!("kitchen-{id_seed}"),
        distance_km: id_seed as f64,
        location: CUSTOMER,
    }
}

pub async fn seed_restaurant(state: &AppState, id_seed: u128, lat: f64, lng: f64) -> Restaurant {
    let restaurant = Restaurant {
        id: Uuid::from_u128(id_seed),
        name: format!("kitchen-{id_seed}"),
        location: GeoPoint { lat, lng },
        is_active: true,
        menu: vec![MenuItem {
            name: "ramen".to_string(),
            available_quantity: 10,
            prep: PrepProfile::default(),
        }],
    };
    state
        .store
        .insert_restaurant(restaurant.clone())
        .await
        .expect("insert restaurant");
    restaurant
}

pub async fn seed_order(state: &AppState) -> Order {
    let order = Order::new(
        vec![OrderItem {
            name: "ramen".to_string(),
            quantity: 2,
        }],
        CUSTOMER,
    );
    state
        .store
        .insert_order(order.clone())
        .await
        .expect("insert order");
    order
}

/// Starts a race for a fresh order against restaurants seeded 1..=count.
pub async fn seed_race(state: &AppState, count: u128) -> Order {
    let order = seed_order(state).await;
    let candidates: Vec<Candidate> = (1..=count).map(candidate).collect();
    crate::engine::broadcast::broadcast(
        state,
        order.id,
        &candidates,
        chrono::Duration::minutes(15),
    )
    .await
    .expect("broadcast");
    order
}

/// Single-slot courier parked at the customer.
pub async fn seed_courier(state: &AppState, id_seed: u128) -> Courier {
    let courier = Courier {
        id: Uuid::from_u128(1_000 + id_seed),
        name: format!("rider-{id_seed}"),
        location: CUSTOMER,
        capacity: 1,
        current_load: 0,
        status: CourierStatus::Available,
        updated_at: Utc::now(),
    };
    state
        .store
        .insert_courier(courier.clone())
        .await
        .expect("insert courier");
    courier
}
