use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not pending: {0}")]
    NotPending(String),

    #[error("already assigned: {0}")]
    AlreadyAssigned(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no candidate restaurants for order {0}")]
    NoCandidates(Uuid),

    #[error("broadcast exhausted for order {0}")]
    BroadcastExhausted(Uuid),

    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("location update failed: {0}")]
    LocationUpdateFailed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Precondition failures are legitimate business outcomes and must not be retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AppError::NotPending(_)
                | AppError::AlreadyAssigned(_)
                | AppError::Expired(_)
                | AppError::Unauthorized(_)
                | AppError::InvalidTransition(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::NotPending(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::AlreadyAssigned(_) => (
                StatusCode::CONFLICT,
                "this order has already been assigned elsewhere".to_string(),
            ),
            AppError::InvalidTransition(_) => (
                StatusCode::CONFLICT,
                "cannot perform this action right now".to_string(),
            ),
            AppError::Expired(msg) => (StatusCode::GONE, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NoCandidates(_) | AppError::BroadcastExhausted(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::InvalidCoordinate { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::LocationUpdateFailed(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
