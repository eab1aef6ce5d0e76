use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::arbiter::{settle_race, RejectOutcome};
use crate::error::AppError;
use crate::models::restaurant_assignment::{AssignmentResponse, RestaurantAssignmentStatus};
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub exhausted_orders: Vec<Uuid>,
}

pub async fn run_expiry_sweeper(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.expiry_sweep_interval_secs);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "expiry sweeper started");

    loop {
        ticker.tick().await;
        match sweep_expired(&state, Utc::now()).await {
            Ok(report) if report.expired > 0 => {
                info!(
                    expired = report.expired,
                    exhausted_orders = report.exhausted_orders.len(),
                    "expired stale restaurant assignments"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "expiry sweep failed"),
        }
    }
}

/// Expires every pending offer past its deadline, then settles each affected race.
pub async fn sweep_expired(state: &AppState, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
    let stale = state.store.expired_pending_assignments(now).await?;

    let mut report = SweepReport::default();
    let mut touched_orders = BTreeSet::new();

    for offer in stale {
        let rows = state
            .store
            .update_restaurant_assignment_if(
                offer.id,
                RestaurantAssignmentStatus::Pending,
                AssignmentResponse {
                    status: RestaurantAssignmentStatus::Expired,
                    responded_at: now,
                    notes: None,
                },
            )
            .await?;

        if rows > 0 {
            report.expired += 1;
            touched_orders.insert(offer.order_id);
            state
                .metrics
                .restaurant_responses_total
                .with_label_values(&["expired"])
                .inc();
        }
    }

    for order_id in touched_orders {
        if settle_race(state, order_id).await? == RejectOutcome::Exhausted {
            report.exhausted_orders.push(order_id);
        }
    }

    Ok(report)
}
