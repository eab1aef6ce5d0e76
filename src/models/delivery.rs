use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Assigned,
    PickedUp,
    OnTheWay,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// The only status a transition into `self` may start from.
    pub fn predecessor(self) -> Option<DeliveryStatus> {
        match self {
            DeliveryStatus::Assigned => None,
            DeliveryStatus::PickedUp => Some(DeliveryStatus::Assigned),
            DeliveryStatus::OnTheWay => Some(DeliveryStatus::PickedUp),
            DeliveryStatus::Delivered => Some(DeliveryStatus::OnTheWay),
            DeliveryStatus::Cancelled => Some(DeliveryStatus::Assigned),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Order status mirrored onto the parent order. Cancellation is left to the caller.
    pub fn order_status(self) -> Option<OrderStatus> {
        match self {
            DeliveryStatus::PickedUp => Some(OrderStatus::PickedUp),
            DeliveryStatus::OnTheWay => Some(OrderStatus::OnTheWay),
            DeliveryStatus::Delivered => Some(OrderStatus::Delivered),
            DeliveryStatus::Assigned | DeliveryStatus::Cancelled => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::OnTheWay => "on_the_way",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub delivery_user_id: Uuid,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub distance_km: Option<f64>,
}

impl DeliveryAssignment {
    pub fn new(order_id: Uuid, delivery_user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            delivery_user_id,
            status: DeliveryStatus::Assigned,
            created_at: now,
            updated_at: now,
            pickup_time: None,
            delivery_time: None,
            cancellation_reason: None,
            estimated_delivery_time: None,
            distance_km: None,
        }
    }
}

/// Fields written by a conditional delivery update.
#[derive(Debug, Clone)]
pub struct DeliveryChange {
    pub status: DeliveryStatus,
    pub at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
}
