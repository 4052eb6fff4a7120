use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orka_types::{Budget, BudgetLevel};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/budgets", post(create))
        .route("/budgets/{id}", get(get_one))
        .route("/budgets/{id}/consume", post(consume))
        .route("/budgets/{id}/reset", post(reset))
}

#[derive(Debug, Deserialize)]
struct CreateBudgetRequest {
    entity_id: String,
    level: BudgetLevel,
    parent_entity_id: Option<String>,
    total: i64,
    currency: String,
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateBudgetRequest>) -> Result<Json<Budget>, ApiError> {
    let budget = state
        .budgets
        .create_budget(req.entity_id, req.level, req.parent_entity_id, req.total, req.currency)
        .await?;
    Ok(Json(budget))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Budget>, ApiError> {
    Ok(Json(state.budgets.get(&id).await?))
}

#[derive(Debug, Deserialize)]
struct ConsumeRequest {
    amount: i64,
}

async fn consume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConsumeRequest>,
) -> Result<(), ApiError> {
    state.budgets.consume(&id, req.amount).await?;
    Ok(())
}

async fn reset(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Budget>, ApiError> {
    Ok(Json(state.budgets.reset_period(&id).await?))
}
