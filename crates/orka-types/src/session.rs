use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionNodeType {
    Message,
    AgentAction,
    BranchPoint,
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub node_type: SessionNodeType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    /// Present when node_type is Message/AgentAction and the action carried a
    /// cost/token accounting figure; used by compare_branches aggregation.
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSummary {
    pub name: String,
    pub node_count: usize,
    pub aggregate_cost: f64,
    pub aggregate_tokens: u64,
    pub all_successful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchComparison {
    pub branches: Vec<BranchSummary>,
    pub winner: Option<String>,
}
