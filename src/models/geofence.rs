use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::delivery::DeliveryStatus;

pub const DWELL_TIME_KEY: &str = "dwell_time_seconds";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Pickup,
    Delivery,
    Restaurant,
    Customer,
}

impl ZoneType {
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneType::Pickup => "pickup",
            ZoneType::Delivery => "delivery",
            ZoneType::Restaurant => "restaurant",
            ZoneType::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceEventType {
    Enter,
    Exit,
    Dwell,
}

impl GeofenceEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeofenceEventType::Enter => "enter",
            GeofenceEventType::Exit => "exit",
            GeofenceEventType::Dwell => "dwell",
        }
    }
}

/// Zone definition before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub zone_type: ZoneType,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    pub order_id: Option<Uuid>,
    pub restaurant_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceZone {
    pub id: Uuid,
    pub name: String,
    pub zone_type: ZoneType,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    pub order_id: Option<Uuid>,
    pub restaurant_id: Option<Uuid>,
    pub is_active: bool,
    pub metadata: Map<String, Value>,
}

impl GeofenceZone {
    pub fn from_spec(spec: ZoneSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            zone_type: spec.zone_type,
            latitude: spec.latitude,
            longitude: spec.longitude,
            radius_meters: spec.radius_meters,
            order_id: spec.order_id,
            restaurant_id: spec.restaurant_id,
            is_active: true,
            metadata: spec.metadata,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Configured dwell duration, if the metadata carries a positive one.
    pub fn dwell_time_seconds(&self) -> Option<f64> {
        self.metadata
            .get(DWELL_TIME_KEY)
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub delivery_user_id: Uuid,
    pub assignment_id: Uuid,
    pub event_type: GeofenceEventType,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory_stage: Option<DeliveryStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub assignment_id: Uuid,
    pub delivery_user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}
