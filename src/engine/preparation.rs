use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::OrderItem;
use crate::models::restaurant::{PrepProfile, Restaurant};
use crate::state::AppState;

pub const PEAK_MULTIPLIER: f64 = 1.3;
pub const MAX_PARALLEL_ITEMS: usize = 3;
pub const FALLBACK_MINUTES: i64 = 30;

const PEAK_WINDOWS: [(u32, u32); 2] = [(11, 14), (18, 21)];

/// Advisory point estimate; kitchens are free to run late.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrepEstimate {
    pub minutes: i64,
    pub completion_time: DateTime<Utc>,
    pub peak: bool,
    pub fallback: bool,
}

pub fn is_peak_hour(hour: u32) -> bool {
    PEAK_WINDOWS
        .iter()
        .any(|(start, end)| hour >= *start && hour < *end)
}

/// Each line is a profile and the units ordered of it. Work is spread over at most
/// three stations. `None` when the profiles do not yield a usable number of minutes.
pub fn estimate_minutes(lines: &[(PrepProfile, u32)], local_hour: u32) -> Option<i64> {
    let units: u64 = lines.iter().map(|(_, quantity)| u64::from(*quantity)).sum();
    if units == 0 {
        return Some(0);
    }

    let peak = if is_peak_hour(local_hour) {
        PEAK_MULTIPLIER
    } else {
        1.0
    };

    let total: f64 = lines
        .iter()
        .map(|(profile, quantity)| {
            profile.total_minutes() * profile.complexity_multiplier * peak * f64::from(*quantity)
        })
        .sum();
    let parallel = units.min(MAX_PARALLEL_ITEMS as u64) as f64;

    // 10 * 1.3 lands a hair above 13.0; drop that noise before rounding up
    let minutes = (((total / parallel) * 100.0).round() / 100.0).ceil();
    if !minutes.is_finite() || minutes < 0.0 || minutes >= i64::MAX as f64 {
        return None;
    }
    Some(minutes as i64)
}

fn fallback(now: DateTime<Utc>, peak: bool) -> PrepEstimate {
    PrepEstimate {
        minutes: FALLBACK_MINUTES,
        completion_time: now + Duration::minutes(FALLBACK_MINUTES),
        peak,
        fallback: true,
    }
}

pub fn estimate_with(
    restaurant: Option<&Restaurant>,
    items: &[OrderItem],
    local_hour: u32,
    now: DateTime<Utc>,
) -> PrepEstimate {
    let peak = is_peak_hour(local_hour);

    let Some(restaurant) = restaurant else {
        return fallback(now, peak);
    };

    let lines: Vec<(PrepProfile, u32)> = items
        .iter()
        .map(|item| {
            let profile = restaurant
                .menu_item(&item.name)
                .map(|menu_item| menu_item.prep.clone())
                .unwrap_or_default();
            (profile, item.quantity)
        })
        .collect();

    let completion = estimate_minutes(&lines, local_hour).and_then(|minutes| {
        let completion_time = now.checked_add_signed(Duration::try_minutes(minutes)?)?;
        Some((minutes, completion_time))
    });
    match completion {
        Some((minutes, completion_time)) => PrepEstimate {
            minutes,
            completion_time,
            peak,
            fallback: false,
        },
        None => {
            warn!(
                restaurant_id = %restaurant.id,
                "prep profiles gave no usable estimate, using fallback prep time"
            );
            fallback(now, peak)
        }
    }
}

/// Preparation estimate at the restaurant's kitchen, using the local clock for peak hours.
pub async fn estimate_prep_time(
    state: &AppState,
    items: &[OrderItem],
    restaurant_id: Uuid,
) -> Result<PrepEstimate, AppError> {
    let restaurant = state.store.get_restaurant(restaurant_id).await?;
    if restaurant.is_none() {
        warn!(restaurant_id = %restaurant_id, "restaurant unknown, using fallback prep time");
    }

    let estimate = estimate_with(restaurant.as_ref(), items, Local::now().hour(), Utc::now());
    debug!(
        restaurant_id = %restaurant_id,
        minutes = estimate.minutes,
        peak = estimate.peak,
        "prep time estimated"
    );
    Ok(estimate)
}
