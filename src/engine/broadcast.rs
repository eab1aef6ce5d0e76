use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::candidates::{find_candidates, Candidate};
use crate::error::AppError;
use crate::models::restaurant_assignment::{RestaurantAssignment, RestaurantAssignmentStatus};
use crate::state::AppState;
use crate::store::RaceOpening;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub order_id: Uuid,
    pub candidates: Vec<Candidate>,
    pub assignments_created: usize,
}

/// Offers the order to every candidate, all sharing one `expires_at`.
pub async fn broadcast(
    state: &AppState,
    order_id: Uuid,
    candidates: &[Candidate],
    ttl: Duration,
) -> Result<usize, AppError> {
    broadcast_at(state, order_id, candidates, ttl, Utc::now()).await
}

pub async fn broadcast_at(
    state: &AppState,
    order_id: Uuid,
    candidates: &[Candidate],
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    if ttl <= Duration::zero() {
        return Err(AppError::BadRequest(
            "broadcast ttl must be positive".to_string(),
        ));
    }
    if candidates.is_empty() {
        warn!(order_id = %order_id, "broadcast skipped: no candidate restaurants");
        return Err(AppError::NoCandidates(order_id));
    }

    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::BadRequest("broadcast ttl is out of range".to_string()))?;
    let mut seen = HashSet::new();
    let offers: Vec<RestaurantAssignment> = candidates
        .iter()
        .filter(|candidate| seen.insert(candidate.restaurant_id))
        .map(|candidate| RestaurantAssignment {
            id: Uuid::new_v4(),
            order_id,
            restaurant_id: candidate.restaurant_id,
            status: RestaurantAssignmentStatus::Pending,
            created_at: now,
            expires_at,
            responded_at: None,
            response_notes: None,
        })
        .collect();

    let opening = state
        .store
        .open_race(order_id, offers, state.config.max_broadcast_attempts)
        .await?;

    match opening {
        RaceOpening::Opened(count) => {
            state.metrics.broadcast_assignments_total.inc_by(count as u64);
            info!(
                order_id = %order_id,
                assignments = count,
                expires_at = %expires_at,
                "order broadcast to restaurants"
            );
            Ok(count)
        }
        RaceOpening::OrderMissing => Err(AppError::NotFound(format!("order {order_id} not found"))),
        RaceOpening::RaceInProgress => Err(AppError::NotPending(format!(
            "order {order_id} already has a broadcast in flight"
        ))),
        RaceOpening::OrderNotOpen(status) => Err(AppError::NotPending(format!(
            "order {order_id} is {status:?} and cannot be broadcast"
        ))),
        RaceOpening::AttemptsExhausted(attempts) => {
            warn!(order_id = %order_id, attempts, "broadcast attempts exhausted");
            Err(AppError::BroadcastExhausted(order_id))
        }
    }
}

/// FindCandidates followed by Broadcast for a stored order.
pub async fn dispatch_order(
    state: &AppState,
    order_id: Uuid,
    radius_km: Option<f64>,
    ttl: Option<Duration>,
) -> Result<DispatchReport, AppError> {
    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let candidates =
        find_candidates(state, &order.items, &order.customer_location, radius_km).await?;
    let ttl = match ttl {
        Some(ttl) => ttl,
        None => Duration::try_minutes(state.config.assignment_ttl_minutes).ok_or_else(|| {
            AppError::BadRequest("configured assignment ttl is out of range".to_string())
        })?,
    };
    let assignments_created = broadcast(state, order_id, &candidates, ttl).await?;

    Ok(DispatchReport {
        order_id,
        candidates,
        assignments_created,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{broadcast, broadcast_at, dispatch_order};
    use crate::config::Config;
    use crate::engine::arbiter::{reject, RejectOutcome};
    use crate::engine::test_support::{candidate, seed_order, seed_restaurant, test_state};
    use crate::error::AppError;
    use crate::models::order::OrderStatus;
    use crate::models::restaurant_assignment::RestaurantAssignmentStatus;
    use crate::state::AppState;

    async fn reject_all_pending(state: &AppState, order_id: Uuid) -> RejectOutcome {
        let pending: Vec<_> = state
            .store
            .list_restaurant_assignments(order_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|offer| offer.status == RestaurantAssignmentStatus::Pending)
            .collect();
        let mut last = None;
        for offer in pending {
            last = Some(reject(state, offer.id, None).await.unwrap());
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn one_pending_offer_per_candidate_with_shared_deadline() {
        let state = test_state();
        let order = seed_order(&state).await;
        let now = Utc::now();
        let candidates = vec![candidate(1), candidate(2), candidate(3)];

        let created = broadcast_at(&state, order.id, &candidates, Duration::minutes(15), now)
            .await
            .unwrap();
        assert_eq!(created, 3);

        let offers = state.store.list_restaurant_assignments(order.id).await.unwrap();
        assert_eq!(offers.len(), 3);
        assert!(offers
            .iter()
            .all(|offer| offer.status == RestaurantAssignmentStatus::Pending));
        assert!(offers
            .iter()
            .all(|offer| offer.expires_at == now + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn empty_candidate_list_creates_nothing() {
        let state = test_state();
        let order = seed_order(&state).await;

        let err = broadcast(&state, order.id, &[], Duration::minutes(15))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoCandidates(id) if id == order.id));

        let offers = state.store.list_restaurant_assignments(order.id).await.unwrap();
        assert!(offers.is_empty());
    }

    #[tokio::test]
    async fn duplicate_candidates_get_a_single_offer() {
        let state = test_state();
        let order = seed_order(&state).await;

        let created = broadcast(&state, order.id, &[candidate(1), candidate(1)], Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let state = test_state();
        let err = broadcast(&state, Uuid::new_v4(), &[candidate(1)], Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn dispatch_finds_and_offers_nearby_kitchens() {
        let state = test_state();
        seed_restaurant(&state, 1, 52.521, 13.406).await;
        seed_restaurant(&state, 2, 52.53, 13.41).await;
        let order = seed_order(&state).await;

        let report = dispatch_order(&state, order.id, None, None).await.unwrap();
        assert_eq!(report.assignments_created, 2);
        assert_eq!(report.candidates[0].restaurant_id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn dispatch_without_kitchens_reports_no_candidates() {
        let state = test_state();
        let order = seed_order(&state).await;

        let err = dispatch_order(&state, order.id, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::NoCandidates(_)));
    }

    #[tokio::test]
    async fn rebroadcast_reopens_race_until_attempts_run_out() {
        let state = AppState::new(Config {
            max_broadcast_attempts: 2,
            ..Config::default()
        });
        let order = seed_order(&state).await;
        let candidates = vec![candidate(1), candidate(2)];

        broadcast(&state, order.id, &candidates, Duration::minutes(5))
            .await
            .unwrap();
        let outcome = reject_all_pending(&state, order.id).await;
        assert!(matches!(outcome, RejectOutcome::Exhausted));
        let stored = state.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::NoRestaurantAccepted);

        let created = broadcast(&state, order.id, &candidates, Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(created, 2);
        let stored = state.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.broadcast_attempts, 2);

        reject_all_pending(&state, order.id).await;
        let err = broadcast(&state, order.id, &candidates, Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BroadcastExhausted(id) if id == order.id));

        let stored = state.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::NoRestaurantAccepted);
        assert_eq!(stored.broadcast_attempts, 2);
        let offers = state.store.list_restaurant_assignments(order.id).await.unwrap();
        assert_eq!(offers.len(), 4);
    }

    #[tokio::test]
    async fn ttl_past_the_calendar_is_rejected_without_offers() {
        let state = test_state();
        let order = seed_order(&state).await;

        let million_years = Duration::try_days(365 * 1_000_000).unwrap();
        let err = broadcast(&state, order.id, &[candidate(1)], million_years)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let offers = state.store.list_restaurant_assignments(order.id).await.unwrap();
        assert!(offers.is_empty());
        let stored = state.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.broadcast_attempts, 0);
    }
}
