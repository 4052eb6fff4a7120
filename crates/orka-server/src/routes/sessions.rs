use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orka_session::Session;
use orka_types::{BranchComparison, OrkaError, SessionNode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create))
        .route("/sessions/{id}", get(get_one))
        .route("/sessions/{id}/messages", post(append_message))
        .route("/sessions/{id}/actions", post(append_agent_action))
        .route("/sessions/{id}/branches", post(create_branch))
        .route("/sessions/{id}/branches/{name}/switch", post(switch_branch))
        .route("/sessions/{id}/fork", post(fork))
        .route("/sessions/{id}/compare", post(compare))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    agent_id: String,
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateSessionRequest>) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.create_session(req.agent_id).await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.get(&id).await?))
}

#[derive(Debug, Deserialize)]
struct AppendNodeRequest {
    payload: Value,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    tokens: u64,
}

async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendNodeRequest>,
) -> Result<Json<SessionNode>, ApiError> {
    Ok(Json(state.sessions.append_message(&id, req.payload, req.cost, req.tokens).await?))
}

async fn append_agent_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendNodeRequest>,
) -> Result<Json<SessionNode>, ApiError> {
    Ok(Json(state.sessions.append_agent_action(&id, req.payload, req.cost, req.tokens).await?))
}

#[derive(Debug, Deserialize)]
struct CreateBranchRequest {
    name: String,
    description: Option<String>,
    at_node: Option<String>,
}

async fn create_branch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateBranchRequest>,
) -> Result<(), ApiError> {
    match req.at_node {
        Some(node_id) => state.sessions.create_branch_at(&id, &node_id, &req.name).await?,
        None => state.sessions.create_branch(&id, &req.name, req.description).await?,
    }
    Ok(())
}

async fn switch_branch(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<(), ApiError> {
    state.sessions.switch_branch(&id, &name).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ForkRequest {
    from_node: String,
}

async fn fork(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ForkRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.fork_session(&id, &req.from_node).await?))
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    branches: Vec<String>,
}

async fn compare(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<BranchComparison>, ApiError> {
    if req.branches.is_empty() {
        return Err(ApiError(OrkaError::Validation("branches must not be empty".into())));
    }
    Ok(Json(state.sessions.compare_branches(&id, &req.branches).await?))
}
