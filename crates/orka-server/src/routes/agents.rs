use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orka_types::{Agent, AgentConfig, AgentEvent};
use serde::Deserialize;

use crate::error::ApiError;
use crate::pagination::{paginate, Page, PageQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", post(create).get(list))
        .route("/agents/{id}", get(get_one))
        .route("/agents/{id}/pause", post(pause))
        .route("/agents/{id}/resume", post(resume))
        .route("/agents/{id}/kill", post(kill))
        .route("/agents/{id}/retry", post(retry))
        .route("/agents/{id}/events", post(send_event))
}

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    #[serde(flatten)]
    config: AgentConfig,
    idempotency_key: Option<String>,
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateAgentRequest>) -> Result<Json<Agent>, ApiError> {
    if let Some(key) = &req.idempotency_key {
        if let Some(cached) = state.idempotent_replay(key).await {
            if let Ok(agent) = serde_json::from_value(cached) {
                return Ok(Json(agent));
            }
        }
    }
    let agent = state.agents.register(req.config).await?;
    if let Some(key) = &req.idempotency_key {
        state.record_idempotent_result(key, serde_json::to_value(&agent).unwrap()).await;
    }
    Ok(Json(agent))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.get_by_id(&id).await?))
}

#[derive(Debug, Deserialize)]
struct ListAgentsQuery {
    team_id: Option<String>,
    #[serde(flatten)]
    page: PageQuery,
}

async fn list(State(state): State<AppState>, Query(query): Query<ListAgentsQuery>) -> Json<Page<Agent>> {
    let agents = match &query.team_id {
        Some(team_id) => state.agents.get_by_team(team_id).await,
        None => state.agents.find(|_| true).await,
    };
    Json(paginate(agents, |a| a.id.clone(), &query.page))
}

async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.transition(&id, AgentEvent::Pause).await?))
}

async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.transition(&id, AgentEvent::Resume).await?))
}

async fn kill(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.transition(&id, AgentEvent::Kill).await?))
}

async fn retry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.transition(&id, AgentEvent::Retry).await?))
}

#[derive(Debug, Deserialize)]
struct SendEventRequest {
    event: AgentEvent,
}

/// Escape hatch for the lifecycle transitions that normally fire from
/// internal engine callbacks (`spawn`, `worktreeReady`, ...) rather than an
/// external caller, useful for integration harnesses driving the state
/// machine directly.
async fn send_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendEventRequest>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.agents.transition(&id, req.event).await?))
}
