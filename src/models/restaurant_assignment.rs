use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestaurantAssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

impl RestaurantAssignmentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RestaurantAssignmentStatus::Pending)
    }
}

/// One restaurant's offer for an order during the assignment race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: RestaurantAssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_notes: Option<String>,
}

impl RestaurantAssignment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Fields written alongside a conditional status change.
#[derive(Debug, Clone)]
pub struct AssignmentResponse {
    pub status: RestaurantAssignmentStatus,
    pub responded_at: DateTime<Utc>,
    pub notes: Option<String>,
}
