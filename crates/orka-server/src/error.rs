use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orka_types::OrkaError;
use serde_json::json;

/// Maps `OrkaError` to HTTP status classes. Never retries anything itself;
/// `TransactionManager`/caller-level retry already happened (or didn't
/// apply) before the error reached here.
pub struct ApiError(pub OrkaError);

impl From<OrkaError> for ApiError {
    fn from(err: OrkaError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            OrkaError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            OrkaError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            OrkaError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            OrkaError::OptimisticLockConflict { .. } => (StatusCode::CONFLICT, "optimistic_lock_conflict"),
            OrkaError::BudgetExceeded { .. } => (StatusCode::PAYMENT_REQUIRED, "budget_exceeded"),
            OrkaError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            OrkaError::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, "circuit_open"),
            OrkaError::TransientStore(_) => (StatusCode::INTERNAL_SERVER_ERROR, "transient_store_error"),
            OrkaError::FatalInternal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if matches!(self.0, OrkaError::FatalInternal(_)) {
            tracing::error!(error = %self.0, "internal error serving request");
        }
        (status, Json(json!({ "error": kind, "message": self.0.to_string() }))).into_response()
    }
}
