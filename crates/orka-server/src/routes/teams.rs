use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use orka_agents::TeamExecutionResult;
use orka_types::{Agent, AgentConfig, Team, TeamConfig};
use serde::Deserialize;

use crate::error::ApiError;
use crate::pagination::{paginate, Page, PageQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/teams", post(create).get(list))
        .route("/teams/{id}", get(get_one))
        .route("/teams/{id}/start", post(start))
        .route("/teams/{id}/pause", post(pause))
        .route("/teams/{id}/resume", post(resume))
        .route("/teams/{id}/destroy", post(destroy))
        .route("/teams/{id}/scale", post(scale))
        .route("/teams/{id}/agents", post(add_agent))
        .route("/teams/{id}/agents/{agent_id}", axum::routing::delete(remove_agent))
        .route("/teams/{id}/execute", post(execute_strategy))
}

async fn create(State(state): State<AppState>, Json(config): Json<TeamConfig>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.create_team(config).await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.get(&id).await?))
}

async fn list(State(state): State<AppState>, Query(page): Query<PageQuery>) -> Result<Json<Page<Team>>, ApiError> {
    let agents = state.agents.find(|_| true).await;
    let team_ids: std::collections::HashSet<String> = agents.into_iter().filter_map(|a| a.team_id).collect();
    let mut teams = Vec::new();
    for id in team_ids {
        if let Ok(team) = state.teams.get(&id).await {
            teams.push(team);
        }
    }
    Ok(Json(paginate(teams, |t| t.id.clone(), &page)))
}

async fn start(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.start_team(&id).await?))
}

async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.pause_team(&id).await?))
}

async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.resume_team(&id).await?))
}

async fn destroy(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.destroy_team(&id).await?))
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    target: u32,
    spawn_template: AgentConfig,
}

async fn scale(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> Result<Json<Team>, ApiError> {
    let template = req.spawn_template;
    let team = state.teams.scale_team(&id, req.target, move || template.clone()).await?;
    Ok(Json(team))
}

async fn add_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<AgentConfig>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(state.teams.add_agent(&id, config).await?))
}

async fn remove_agent(
    State(state): State<AppState>,
    Path((id, agent_id)): Path<(String, String)>,
) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.remove_agent(&id, &agent_id).await?))
}

async fn execute_strategy(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<TeamExecutionResult>, ApiError> {
    Ok(Json(state.teams.execute_strategy(&id).await?))
}
