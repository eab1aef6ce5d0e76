pub mod assignments;
pub mod couriers;
pub mod deliveries;
pub mod orders;
pub mod restaurants;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(restaurants::router())
        .merge(couriers::router())
        .merge(orders::router())
        .merge(assignments::router())
        .merge(deliveries::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    restaurants: usize,
    couriers: usize,
    orders: usize,
    deliveries: usize,
    active_zones: usize,
    tracking_sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let stats = state.store.stats().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        restaurants: stats.restaurants,
        couriers: stats.couriers,
        orders: stats.orders,
        deliveries: stats.deliveries,
        active_zones: stats.active_zones,
        tracking_sessions: state.sessions.len(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
