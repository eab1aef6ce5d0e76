use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::delivery::{DeliveryAssignment, DeliveryChange, DeliveryStatus};
use crate::models::geofence::{GeofenceEvent, GeofenceZone, LocationSample};
use crate::models::order::{Order, OrderStatus};
use crate::models::restaurant::Restaurant;
use crate::models::restaurant_assignment::{
    AssignmentResponse, RestaurantAssignment, RestaurantAssignmentStatus,
};
use crate::store::{AcceptOutcome, Acceptance, FulfillmentStore, RaceOpening, StoreStats};

/// An order row together with every offer made for it. Keeping both under one map
/// entry means one entry lock covers the whole arbitration unit.
struct OrderRecord {
    order: Order,
    offers: Vec<RestaurantAssignment>,
}

/// In-process store. Lock discipline: at most one `orders` entry guard is held at a
/// time, and `offer_index` lookups are released before that guard is taken.
#[derive(Default)]
pub struct MemoryStore {
    restaurants: DashMap<Uuid, Restaurant>,
    couriers: DashMap<Uuid, Courier>,
    orders: DashMap<Uuid, OrderRecord>,
    offer_index: DashMap<Uuid, Uuid>,
    deliveries: DashMap<Uuid, DeliveryAssignment>,
    zones: DashMap<Uuid, GeofenceZone>,
    geofence_events: DashMap<Uuid, Vec<GeofenceEvent>>,
    locations: DashMap<Uuid, Vec<LocationSample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn order_of_offer(&self, offer_id: Uuid) -> Option<Uuid> {
        self.offer_index.get(&offer_id).map(|entry| *entry.value())
    }
}

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn stats(&self) -> Result<StoreStats, AppError> {
        Ok(StoreStats {
            restaurants: self.restaurants.len(),
            couriers: self.couriers.len(),
            orders: self.orders.len(),
            deliveries: self.deliveries.len(),
            active_zones: self.zones.iter().filter(|zone| zone.is_active).count(),
        })
    }

    async fn insert_restaurant(&self, restaurant: Restaurant) -> Result<(), AppError> {
        self.restaurants.insert(restaurant.id, restaurant);
        Ok(())
    }

    async fn get_restaurant(&self, id: Uuid) -> Result<Option<Restaurant>, AppError> {
        Ok(self.restaurants.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_restaurants(&self) -> Result<Vec<Restaurant>, AppError> {
        Ok(self
            .restaurants
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_courier(&self, courier: Courier) -> Result<(), AppError> {
        self.couriers.insert(courier.id, courier);
        Ok(())
    }

    async fn list_couriers(&self) -> Result<Vec<Courier>, AppError> {
        Ok(self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn reserve_courier(&self, id: Uuid) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        if !courier.can_take_job() {
            return Err(AppError::NotPending(format!(
                "courier {id} has no free capacity"
            )));
        }

        courier.current_load = courier.current_load.saturating_add(1);
        if courier.current_load >= courier.capacity {
            courier.status = CourierStatus::Busy;
        }
        courier.updated_at = Utc::now();

        Ok(courier.clone())
    }

    async fn release_courier(&self, id: Uuid) -> Result<(), AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        courier.current_load = courier.current_load.saturating_sub(1);
        if courier.status == CourierStatus::Busy && courier.current_load < courier.capacity {
            courier.status = CourierStatus::Available;
        }
        courier.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_order(&self, order: Order) -> Result<(), AppError> {
        self.orders.insert(
            order.id,
            OrderRecord {
                order,
                offers: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(&id).map(|record| record.order.clone()))
    }

    async fn set_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order, AppError> {
        let mut record = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        record.order.status = status;
        record.order.updated_at = Utc::now();
        Ok(record.order.clone())
    }

    async fn open_race(
        &self,
        order_id: Uuid,
        offers: Vec<RestaurantAssignment>,
        max_attempts: u32,
    ) -> Result<RaceOpening, AppError> {
        let Some(mut record) = self.orders.get_mut(&order_id) else {
            return Ok(RaceOpening::OrderMissing);
        };

        match record.order.status {
            OrderStatus::Pending | OrderStatus::NoRestaurantAccepted => {}
            other => return Ok(RaceOpening::OrderNotOpen(other)),
        }
        if record
            .offers
            .iter()
            .any(|offer| offer.status == RestaurantAssignmentStatus::Pending)
        {
            return Ok(RaceOpening::RaceInProgress);
        }
        if record.order.broadcast_attempts >= max_attempts {
            return Ok(RaceOpening::AttemptsExhausted(record.order.broadcast_attempts));
        }

        let count = offers.len();
        record.order.broadcast_attempts += 1;
        record.order.status = OrderStatus::Pending;
        record.order.updated_at = Utc::now();
        for offer in offers {
            self.offer_index.insert(offer.id, order_id);
            record.offers.push(offer);
        }

        Ok(RaceOpening::Opened(count))
    }

    async fn get_restaurant_assignment(
        &self,
        id: Uuid,
    ) -> Result<Option<RestaurantAssignment>, AppError> {
        let Some(order_id) = self.order_of_offer(id) else {
            return Ok(None);
        };
        Ok(self.orders.get(&order_id).and_then(|record| {
            record.offers.iter().find(|offer| offer.id == id).cloned()
        }))
    }

    async fn list_restaurant_assignments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<RestaurantAssignment>, AppError> {
        Ok(self
            .orders
            .get(&order_id)
            .map(|record| record.offers.clone())
            .unwrap_or_default())
    }

    async fn update_restaurant_assignment_if(
        &self,
        id: Uuid,
        expected: RestaurantAssignmentStatus,
        change: AssignmentResponse,
    ) -> Result<u64, AppError> {
        let Some(order_id) = self.order_of_offer(id) else {
            return Ok(0);
        };
        let Some(mut record) = self.orders.get_mut(&order_id) else {
            return Ok(0);
        };

        match record
            .offers
            .iter_mut()
            .find(|offer| offer.id == id && offer.status == expected)
        {
            Some(offer) => {
                offer.status = change.status;
                offer.responded_at = Some(change.responded_at);
                offer.response_notes = change.notes;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn commit_acceptance(
        &self,
        id: Uuid,
        restaurant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, AppError> {
        let Some(order_id) = self.order_of_offer(id) else {
            return Ok(AcceptOutcome::NotFound);
        };
        let Some(mut guard) = self.orders.get_mut(&order_id) else {
            return Ok(AcceptOutcome::NotFound);
        };
        let record = &mut *guard;

        let Some(offer) = record.offers.iter().find(|offer| offer.id == id) else {
            return Ok(AcceptOutcome::NotFound);
        };
        if offer.restaurant_id != restaurant_id {
            return Ok(AcceptOutcome::WrongRestaurant {
                expected: offer.restaurant_id,
            });
        }
        if offer.status != RestaurantAssignmentStatus::Pending {
            return Ok(AcceptOutcome::NotPending(offer.status));
        }
        if record.order.status != OrderStatus::Pending {
            return Ok(AcceptOutcome::OrderClosed(record.order.status));
        }
        if offer.is_expired_at(now) {
            return Ok(AcceptOutcome::Expired(offer.expires_at));
        }

        let mut accepted = None;
        let mut cancelled = Vec::new();
        for offer in record.offers.iter_mut() {
            if offer.id == id {
                offer.status = RestaurantAssignmentStatus::Accepted;
                offer.responded_at = Some(now);
                accepted = Some(offer.clone());
            } else if offer.status == RestaurantAssignmentStatus::Pending {
                offer.status = RestaurantAssignmentStatus::Cancelled;
                cancelled.push(offer.id);
            }
        }

        record.order.status = OrderStatus::RestaurantAccepted;
        record.order.restaurant_id = Some(restaurant_id);
        record.order.updated_at = now;

        let assignment = accepted
            .ok_or_else(|| AppError::Internal(format!("offer {id} vanished mid-commit")))?;

        Ok(AcceptOutcome::Accepted(Acceptance {
            assignment,
            order: record.order.clone(),
            cancelled,
        }))
    }

    async fn close_race_if_exhausted(&self, order_id: Uuid) -> Result<bool, AppError> {
        let Some(mut record) = self.orders.get_mut(&order_id) else {
            return Ok(false);
        };

        let exhausted = record.order.status == OrderStatus::Pending
            && !record.offers.is_empty()
            && record.offers.iter().all(|offer| offer.status.is_terminal());

        if exhausted {
            record.order.status = OrderStatus::NoRestaurantAccepted;
            record.order.updated_at = Utc::now();
        }
        Ok(exhausted)
    }

    async fn cancel_race(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Uuid>>, AppError> {
        let mut record = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if record.order.status != OrderStatus::Pending {
            return Ok(None);
        }

        let mut cancelled = Vec::new();
        for offer in record.offers.iter_mut() {
            if offer.status == RestaurantAssignmentStatus::Pending {
                offer.status = RestaurantAssignmentStatus::Cancelled;
                cancelled.push(offer.id);
            }
        }
        record.order.status = OrderStatus::Cancelled;
        record.order.updated_at = now;

        Ok(Some(cancelled))
    }

    async fn expired_pending_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RestaurantAssignment>, AppError> {
        Ok(self
            .orders
            .iter()
            .flat_map(|record| {
                record
                    .offers
                    .iter()
                    .filter(|offer| {
                        offer.status == RestaurantAssignmentStatus::Pending
                            && offer.is_expired_at(now)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn insert_delivery_if_none_active(
        &self,
        delivery: DeliveryAssignment,
    ) -> Result<bool, AppError> {
        let order_id = delivery.order_id;
        // held so two attachments for one order serialize
        let _order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let live = self
            .deliveries
            .iter()
            .any(|existing| existing.order_id == order_id && !existing.status.is_terminal());
        if live {
            return Ok(false);
        }

        self.deliveries.insert(delivery.id, delivery);
        Ok(true)
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<DeliveryAssignment>, AppError> {
        Ok(self.deliveries.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_delivery_if(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        change: DeliveryChange,
    ) -> Result<u64, AppError> {
        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(0);
        };
        if delivery.status != expected {
            return Ok(0);
        }

        delivery.status = change.status;
        delivery.updated_at = change.at;
        match change.status {
            DeliveryStatus::PickedUp => delivery.pickup_time = Some(change.at),
            DeliveryStatus::Delivered => delivery.delivery_time = Some(change.at),
            DeliveryStatus::Cancelled => delivery.cancellation_reason = change.cancellation_reason,
            DeliveryStatus::Assigned | DeliveryStatus::OnTheWay => {}
        }
        Ok(1)
    }

    async fn set_delivery_estimate(
        &self,
        id: Uuid,
        estimated_delivery_time: DateTime<Utc>,
        distance_km: Option<f64>,
    ) -> Result<DeliveryAssignment, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("delivery assignment {id} not found")))?;

        delivery.estimated_delivery_time = Some(estimated_delivery_time);
        if distance_km.is_some() {
            delivery.distance_km = distance_km;
        }
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    async fn insert_zone(&self, zone: GeofenceZone) -> Result<(), AppError> {
        self.zones.insert(zone.id, zone);
        Ok(())
    }

    async fn deactivate_zone(&self, id: Uuid) -> Result<bool, AppError> {
        let Some(mut zone) = self.zones.get_mut(&id) else {
            return Ok(false);
        };
        let was_active = zone.is_active;
        zone.is_active = false;
        Ok(was_active)
    }

    async fn deactivate_order_zones(&self, order_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let mut deactivated = Vec::new();
        for mut zone in self.zones.iter_mut() {
            if zone.is_active && zone.order_id == Some(order_id) {
                zone.is_active = false;
                deactivated.push(zone.id);
            }
        }
        Ok(deactivated)
    }

    async fn active_zones_for_order(
        &self,
        order_id: Uuid,
        restaurant_id: Option<Uuid>,
    ) -> Result<Vec<GeofenceZone>, AppError> {
        Ok(self
            .zones
            .iter()
            .filter(|zone| {
                zone.is_active
                    && (zone.order_id == Some(order_id)
                        || (zone.order_id.is_none()
                            && restaurant_id.is_some()
                            && zone.restaurant_id == restaurant_id))
            })
            .map(|zone| zone.value().clone())
            .collect())
    }

    async fn append_geofence_event(&self, event: GeofenceEvent) -> Result<(), AppError> {
        self.geofence_events
            .entry(event.assignment_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_geofence_events(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<GeofenceEvent>, AppError> {
        Ok(self
            .geofence_events
            .get(&assignment_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn record_location(&self, sample: LocationSample) -> Result<(), AppError> {
        self.locations
            .entry(sample.assignment_id)
            .or_default()
            .push(sample);
        Ok(())
    }

    async fn list_locations(&self, assignment_id: Uuid) -> Result<Vec<LocationSample>, AppError> {
        Ok(self
            .locations
            .get(&assignment_id)
            .map(|samples| samples.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::geo::GeoPoint;
    use crate::models::order::{Order, OrderItem, OrderStatus};
    use crate::models::restaurant_assignment::{
        AssignmentResponse, RestaurantAssignment, RestaurantAssignmentStatus,
    };
    use crate::store::{FulfillmentStore, RaceOpening};

    fn offer(order_id: Uuid) -> RestaurantAssignment {
        let now = Utc::now();
        RestaurantAssignment {
            id: Uuid::new_v4(),
            order_id,
            restaurant_id: Uuid::new_v4(),
            status: RestaurantAssignmentStatus::Pending,
            created_at: now,
            expires_at: now + Duration::minutes(15),
            responded_at: None,
            response_notes: None,
        }
    }

    async fn store_with_order() -> (MemoryStore, Order) {
        let store = MemoryStore::new();
        let order = Order::new(
            vec![OrderItem {
                name: "soup".to_string(),
                quantity: 1,
            }],
            GeoPoint::new(52.52, 13.405),
        );
        store.insert_order(order.clone()).await.unwrap();
        (store, order)
    }

    #[tokio::test]
    async fn conditional_update_touches_only_matching_rows() {
        let (store, order) = store_with_order().await;
        let first = offer(order.id);
        let first_id = first.id;
        store.open_race(order.id, vec![first], 3).await.unwrap();

        let change = AssignmentResponse {
            status: RestaurantAssignmentStatus::Rejected,
            responded_at: Utc::now(),
            notes: Some("closed".to_string()),
        };

        let rows = store
            .update_restaurant_assignment_if(first_id, RestaurantAssignmentStatus::Pending, change.clone())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let rows = store
            .update_restaurant_assignment_if(first_id, RestaurantAssignmentStatus::Pending, change)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn race_cannot_reopen_while_offers_pending() {
        let (store, order) = store_with_order().await;
        store.open_race(order.id, vec![offer(order.id)], 3).await.unwrap();

        let reopened = store.open_race(order.id, vec![offer(order.id)], 3).await.unwrap();
        assert!(matches!(reopened, RaceOpening::RaceInProgress));
    }

    #[tokio::test]
    async fn exhaustion_requires_every_offer_terminal() {
        let (store, order) = store_with_order().await;
        let a = offer(order.id);
        let b = offer(order.id);
        let (a_id, b_id) = (a.id, b.id);
        store.open_race(order.id, vec![a, b], 3).await.unwrap();

        let reject = AssignmentResponse {
            status: RestaurantAssignmentStatus::Rejected,
            responded_at: Utc::now(),
            notes: None,
        };
        store
            .update_restaurant_assignment_if(a_id, RestaurantAssignmentStatus::Pending, reject.clone())
            .await
            .unwrap();
        assert!(!store.close_race_if_exhausted(order.id).await.unwrap());

        store
            .update_restaurant_assignment_if(b_id, RestaurantAssignmentStatus::Pending, reject)
            .await
            .unwrap();
        assert!(store.close_race_if_exhausted(order.id).await.unwrap());

        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::NoRestaurantAccepted);
    }
}
