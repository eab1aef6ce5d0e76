//! Persistence seam for the orchestrator.
//!
//! Arbitration correctness depends on two primitives every backend must provide
//! atomically: the conditional status update (`update_*_if`, returning the number
//! of rows it touched) and [`FulfillmentStore::commit_acceptance`], which accepts
//! one offer, cancels its siblings and binds the order in a single unit.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::Courier;
use crate::models::delivery::{DeliveryAssignment, DeliveryChange, DeliveryStatus};
use crate::models::geofence::{GeofenceEvent, GeofenceZone, LocationSample};
use crate::models::order::{Order, OrderStatus};
use crate::models::restaurant::Restaurant;
use crate::models::restaurant_assignment::{
    AssignmentResponse, RestaurantAssignment, RestaurantAssignmentStatus,
};

pub use memory::MemoryStore;

/// Result of trying to open (or re-open) an assignment race for an order.
#[derive(Debug)]
pub enum RaceOpening {
    Opened(usize),
    OrderMissing,
    RaceInProgress,
    OrderNotOpen(OrderStatus),
    AttemptsExhausted(u32),
}

/// A committed acceptance: the winning offer, the updated order and the offers it cancelled.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub assignment: RestaurantAssignment,
    pub order: Order,
    pub cancelled: Vec<Uuid>,
}

/// Result of the atomic accept unit. Every non-`Accepted` arm leaves storage untouched.
#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(Acceptance),
    NotFound,
    WrongRestaurant { expected: Uuid },
    NotPending(RestaurantAssignmentStatus),
    OrderClosed(OrderStatus),
    Expired(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub restaurants: usize,
    pub couriers: usize,
    pub orders: usize,
    pub deliveries: usize,
    pub active_zones: usize,
}

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    async fn stats(&self) -> Result<StoreStats, AppError>;

    async fn insert_restaurant(&self, restaurant: Restaurant) -> Result<(), AppError>;
    async fn get_restaurant(&self, id: Uuid) -> Result<Option<Restaurant>, AppError>;
    async fn list_restaurants(&self) -> Result<Vec<Restaurant>, AppError>;

    async fn insert_courier(&self, courier: Courier) -> Result<(), AppError>;
    async fn list_couriers(&self) -> Result<Vec<Courier>, AppError>;
    /// Takes one job slot; fails when the courier is unknown or has no free capacity.
    async fn reserve_courier(&self, id: Uuid) -> Result<Courier, AppError>;
    /// Gives one job slot back.
    async fn release_courier(&self, id: Uuid) -> Result<(), AppError>;

    async fn insert_order(&self, order: Order) -> Result<(), AppError>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;
    async fn set_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, AppError>;

    /// Inserts the offers for a new race and counts the attempt, provided the order
    /// exists, is open for broadcast and has attempts left.
    async fn open_race(
        &self,
        order_id: Uuid,
        offers: Vec<RestaurantAssignment>,
        max_attempts: u32,
    ) -> Result<RaceOpening, AppError>;
    async fn get_restaurant_assignment(
        &self,
        id: Uuid,
    ) -> Result<Option<RestaurantAssignment>, AppError>;
    async fn list_restaurant_assignments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<RestaurantAssignment>, AppError>;
    /// `UPDATE ... SET status = change.status WHERE id = id AND status = expected`.
    async fn update_restaurant_assignment_if(
        &self,
        id: Uuid,
        expected: RestaurantAssignmentStatus,
        change: AssignmentResponse,
    ) -> Result<u64, AppError>;
    async fn commit_acceptance(
        &self,
        id: Uuid,
        restaurant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, AppError>;
    /// Moves a still-pending order to `no_restaurant_accepted` when none of its offers is
    /// pending. Returns whether the order was closed by this call.
    async fn close_race_if_exhausted(&self, order_id: Uuid) -> Result<bool, AppError>;
    /// Cancels a pending order together with all of its pending offers. Returns the
    /// cancelled offer ids, or `None` when the order is no longer pending.
    async fn cancel_race(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Uuid>>, AppError>;
    async fn expired_pending_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RestaurantAssignment>, AppError>;

    /// Inserts the delivery unless its order already has one that is not terminal.
    /// Returns whether it was inserted.
    async fn insert_delivery_if_none_active(
        &self,
        delivery: DeliveryAssignment,
    ) -> Result<bool, AppError>;
    async fn get_delivery(&self, id: Uuid) -> Result<Option<DeliveryAssignment>, AppError>;
    /// Optimistic per-row update; returns 0 when the row moved on or does not exist.
    async fn update_delivery_if(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        change: DeliveryChange,
    ) -> Result<u64, AppError>;
    async fn set_delivery_estimate(
        &self,
        id: Uuid,
        estimated_delivery_time: DateTime<Utc>,
        distance_km: Option<f64>,
    ) -> Result<DeliveryAssignment, AppError>;

    async fn insert_zone(&self, zone: GeofenceZone) -> Result<(), AppError>;
    /// Soft delete. Returns whether an active zone was deactivated.
    async fn deactivate_zone(&self, id: Uuid) -> Result<bool, AppError>;
    async fn deactivate_order_zones(&self, order_id: Uuid) -> Result<Vec<Uuid>, AppError>;
    /// Active zones tied to the order, plus active zones tied to its restaurant.
    async fn active_zones_for_order(
        &self,
        order_id: Uuid,
        restaurant_id: Option<Uuid>,
    ) -> Result<Vec<GeofenceZone>, AppError>;

    async fn append_geofence_event(&self, event: GeofenceEvent) -> Result<(), AppError>;
    async fn list_geofence_events(&self, assignment_id: Uuid)
    -> Result<Vec<GeofenceEvent>, AppError>;
    async fn record_location(&self, sample: LocationSample) -> Result<(), AppError>;
    async fn list_locations(&self, assignment_id: Uuid) -> Result<Vec<LocationSample>, AppError>;
}
