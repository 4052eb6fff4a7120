use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use orka_types::{Workflow, WorkflowSpec};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create))
        .route("/workflows/{id}", axum::routing::get(get_one))
        .route("/workflows/{id}/start", post(start))
        .route("/workflows/{id}/cancel", post(cancel))
        .route("/workflows/{id}/steps/{step_id}/complete", post(complete_step))
        .route("/workflows/{id}/steps/{step_id}/fail", post(fail_step))
}

async fn create(State(state): State<AppState>, Json(spec): Json<WorkflowSpec>) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.create(spec).await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.get(&id).await?))
}

async fn start(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.start(&id).await?))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.cancel(&id).await?))
}

#[derive(Debug, Deserialize)]
struct CompleteStepRequest {
    result: Value,
}

async fn complete_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(req): Json<CompleteStepRequest>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.complete_step(&id, &step_id, req.result).await?))
}

#[derive(Debug, Deserialize)]
struct FailStepRequest {
    error: String,
}

async fn fail_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(req): Json<FailStepRequest>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.fail_step(&id, &step_id, req.error).await?))
}
