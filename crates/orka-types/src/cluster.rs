use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCapacity {
    pub max_agents: u32,
    pub current_agents: u32,
    pub load_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    pub status: ClusterStatus,
    pub health_score: f64,
    pub capacity: ClusterCapacity,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: HashSet<String>,
    pub breaker_state: BreakerState,
    pub consecutive_failures: u32,
    pub breaker_opened_at: Option<DateTime<Utc>>,
    pub connectivity_success_rate: f64,
    pub mean_latency_ms: f64,
    pub error_rate: f64,
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequirements {
    #[serde(default)]
    pub features: HashSet<String>,
    #[serde(default)]
    pub models: HashSet<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub strict_region: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub requirements: RoutingRequirements,
}
