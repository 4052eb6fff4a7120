use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    Creating,
    Active,
    Scaling,
    Paused,
    Completed,
    Failed,
    Destroyed,
}

impl TeamStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TeamStatus::Destroyed)
    }
}

/// Closed set of execution strategies, dispatched on a tagged enum rather
/// than an open inheritance hierarchy. Per-strategy state lives inline in
/// the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Parallel,
    MapReduce { reducer_step: String },
    Pipeline { stages: Vec<Vec<String>> },
    Tree { max_depth: u32 },
}

impl ExecutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::MapReduce { .. } => "map-reduce",
            ExecutionStrategy::Pipeline { .. } => "pipeline",
            ExecutionStrategy::Tree { .. } => "tree",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub strategy: ExecutionStrategy,
    pub status: TeamStatus,
    pub agent_ids: Vec<String>,
    pub budget_allocated: Option<i64>,
    pub budget_consumed: i64,
    pub max_agents: u32,
    pub version: u64,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub strategy: ExecutionStrategy,
    #[serde(default)]
    pub budget_allocated: Option<i64>,
    pub max_agents: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Team {
    pub fn new(config: TeamConfig) -> Self {
        let now = Utc::now();
        Team {
            id: crate::new_id(),
            name: config.name,
            description: config.description,
            strategy: config.strategy,
            status: TeamStatus::Creating,
            agent_ids: Vec::new(),
            budget_allocated: config.budget_allocated,
            budget_consumed: 0,
            max_agents: config.max_agents,
            version: 0,
            metadata: config.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}
