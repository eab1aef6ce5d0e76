use serde::Serialize;
use uuid::Uuid;

use crate::models::delivery::DeliveryAssignment;
use crate::models::geofence::GeofenceEvent;
use crate::models::restaurant_assignment::RestaurantAssignment;
use crate::notify::Notification;

/// Everything pushed to live subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FulfillmentEvent {
    RestaurantAccepted {
        assignment: RestaurantAssignment,
        cancelled: Vec<Uuid>,
    },
    BroadcastExhausted {
        order_id: Uuid,
    },
    DeliveryTransition {
        assignment: DeliveryAssignment,
    },
    Geofence {
        event: GeofenceEvent,
    },
    Notification {
        notification: Notification,
    },
}
