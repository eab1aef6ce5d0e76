//! Resolves the assignment race between restaurants.
//!
//! Accept is a single call into [`FulfillmentStore::commit_acceptance`], which
//! checks the preconditions and performs accept + cancel-siblings + bind-order
//! as one unit; two concurrent accepts for the same order therefore cannot both
//! observe a pending offer. Reject and expiry use the conditional update and then
//! close the race when no pending offer is left.
//!
//! [`FulfillmentStore::commit_acceptance`]: crate::store::FulfillmentStore::commit_acceptance

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::FulfillmentEvent;
use crate::models::restaurant_assignment::{AssignmentResponse, RestaurantAssignmentStatus};
use crate::state::AppState;
use crate::store::{AcceptOutcome, Acceptance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RejectOutcome {
    StillOpen { pending: usize },
    Exhausted,
}

pub async fn accept(
    state: &AppState,
    assignment_id: Uuid,
    restaurant_id: Uuid,
) -> Result<Acceptance, AppError> {
    accept_at(state, assignment_id, restaurant_id, Utc::now()).await
}

pub async fn accept_at(
    state: &AppState,
    assignment_id: Uuid,
    restaurant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Acceptance, AppError> {
    let start = Instant::now();
    let outcome = state
        .store
        .commit_acceptance(assignment_id, restaurant_id, now)
        .await?;

    let result = match outcome {
        AcceptOutcome::Accepted(acceptance) => Ok(acceptance),
        AcceptOutcome::NotFound => Err(AppError::NotFound(format!(
            "restaurant assignment {assignment_id} not found"
        ))),
        AcceptOutcome::WrongRestaurant { expected } => Err(AppError::Unauthorized(format!(
            "assignment {assignment_id} was offered to restaurant {expected}, not {restaurant_id}"
        ))),
        AcceptOutcome::NotPending(status) => Err(AppError::AlreadyAssigned(format!(
            "assignment {assignment_id} is already {status:?}"
        ))),
        AcceptOutcome::OrderClosed(status) => Err(AppError::AlreadyAssigned(format!(
            "order for assignment {assignment_id} is already {status:?}"
        ))),
        AcceptOutcome::Expired(expires_at) => Err(AppError::Expired(format!(
            "assignment {assignment_id} expired at {expires_at}"
        ))),
    };

    let label = outcome_label(&result);
    state
        .metrics
        .arbitration_latency_seconds
        .with_label_values(&[label])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .restaurant_responses_total
        .with_label_values(&[label])
        .inc();

    match &result {
        Ok(acceptance) => {
            info!(
                order_id = %acceptance.order.id,
                assignment_id = %assignment_id,
                restaurant_id = %restaurant_id,
                cancelled = acceptance.cancelled.len(),
                "restaurant won assignment race"
            );
            state.publish(FulfillmentEvent::RestaurantAccepted {
                assignment: acceptance.assignment.clone(),
                cancelled: acceptance.cancelled.clone(),
            });
        }
        Err(err) => {
            info!(
                assignment_id = %assignment_id,
                restaurant_id = %restaurant_id,
                error = %err,
                "restaurant acceptance refused"
            );
        }
    }

    result
}

pub async fn reject(
    state: &AppState,
    assignment_id: Uuid,
    reason: Option<String>,
) -> Result<RejectOutcome, AppError> {
    reject_at(state, assignment_id, reason, Utc::now()).await
}

pub async fn reject_at(
    state: &AppState,
    assignment_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<RejectOutcome, AppError> {
    let assignment = state
        .store
        .get_restaurant_assignment(assignment_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("restaurant assignment {assignment_id} not found"))
        })?;

    if assignment.status != RestaurantAssignmentStatus::Pending {
        return Err(AppError::NotPending(format!(
            "assignment {assignment_id} is already {:?}",
            assignment.status
        )));
    }

    let rows = state
        .store
        .update_restaurant_assignment_if(
            assignment_id,
            RestaurantAssignmentStatus::Pending,
            AssignmentResponse {
                status: RestaurantAssignmentStatus::Rejected,
                responded_at: now,
                notes: reason,
            },
        )
        .await?;
    if rows == 0 {
        return Err(AppError::NotPending(format!(
            "assignment {assignment_id} was resolved concurrently"
        )));
    }

    state
        .metrics
        .restaurant_responses_total
        .with_label_values(&["rejected"])
        .inc();
    info!(
        order_id = %assignment.order_id,
        assignment_id = %assignment_id,
        restaurant_id = %assignment.restaurant_id,
        "restaurant rejected assignment"
    );

    settle_race(state, assignment.order_id).await
}

/// Closes the race when nothing is pending any more; otherwise reports what is left.
pub(crate) async fn settle_race(state: &AppState, order_id: Uuid) -> Result<RejectOutcome, AppError> {
    if state.store.close_race_if_exhausted(order_id).await? {
        warn!(
            order_id = %order_id,
            error = %AppError::BroadcastExhausted(order_id),
            "no restaurant accepted; escalating to re-dispatch"
        );
        state.publish(FulfillmentEvent::BroadcastExhausted { order_id });
        return Ok(RejectOutcome::Exhausted);
    }

    let pending = state
        .store
        .list_restaurant_assignments(order_id)
        .await?
        .iter()
        .filter(|offer| offer.status == RestaurantAssignmentStatus::Pending)
        .count();
    Ok(RejectOutcome::StillOpen { pending })
}

/// Withdraws an in-flight broadcast; later accepts fail their precondition.
pub async fn cancel_broadcast(state: &AppState, order_id: Uuid) -> Result<Vec<Uuid>, AppError> {
    match state.store.cancel_race(order_id, Utc::now()).await? {
        Some(cancelled) => {
            info!(
                order_id = %order_id,
                cancelled = cancelled.len(),
                "broadcast cancelled"
            );
            Ok(cancelled)
        }
        None => Err(AppError::NotPending(format!(
            "order {order_id} is no longer pending"
        ))),
    }
}

fn outcome_label(result: &Result<Acceptance, AppError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(AppError::NotFound(_)) => "not_found",
        Err(AppError::Unauthorized(_)) => "unauthorized",
        Err(AppError::AlreadyAssigned(_)) => "already_assigned",
        Err(AppError::Expired(_)) => "expired",
        Err(_) => "error",
    }
}
