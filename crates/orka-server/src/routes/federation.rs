use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use orka_types::{Cluster, RoutingRequest};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clusters", post(register))
        .route("/clusters/{id}/heartbeat", post(heartbeat))
        .route("/route", post(route))
}

async fn register(State(state): State<AppState>, Json(cluster): Json<Cluster>) -> Result<Json<Cluster>, ApiError> {
    Ok(Json(state.federation.register_cluster(cluster).await?))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    connectivity_success_rate: f64,
    mean_latency_ms: f64,
    error_rate: f64,
    current_agents: u32,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Cluster>, ApiError> {
    let cluster = state
        .federation
        .heartbeat(&id, req.connectivity_success_rate, req.mean_latency_ms, req.error_rate, req.current_agents)
        .await?;
    Ok(Json(cluster))
}

async fn route(State(state): State<AppState>, Json(request): Json<RoutingRequest>) -> Result<Json<Cluster>, ApiError> {
    Ok(Json(state.federation.route(&request).await?))
}
