use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    RestaurantAccepted,
    NoRestaurantAccepted,
    PickedUp,
    OnTheWay,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub items: Vec<OrderItem>,
    pub customer_location: GeoPoint,
    pub status: OrderStatus,
    pub restaurant_id: Option<Uuid>,
    pub broadcast_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(items: Vec<OrderItem>, customer_location: GeoPoint) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            items,
            customer_location,
            status: OrderStatus::Pending,
            restaurant_id: None,
            broadcast_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
