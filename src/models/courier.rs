use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub capacity: u8,
    pub current_load: u8,
    pub status: CourierStatus,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn can_take_job(&self) -> bool {
        self.status == CourierStatus::Available && self.current_load < self.capacity
    }
}
