use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Killed,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Killed)
    }
}

/// Finer-grained substates, for UI/debug only. Not part of the
/// transition-validation table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleSubstate {
    Initializing,
    Spawning,
    Executing,
    Waiting,
    Paused,
    Completing,
    CleaningUp,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    Spawn,
    WorktreeReady,
    SessionStarted,
    TaskComplete,
    CleanupDone,
    Error,
    Retry,
    Pause,
    Resume,
    Kill,
    CleanupError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub team_id: Option<String>,
    pub model: String,
    pub task: String,
    pub status: AgentStatus,
    pub lifecycle_substate: AgentLifecycleSubstate,
    pub retry_count: u32,
    pub max_retries: u32,
    pub version: u64,
    pub spawned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub worktree_path: Option<String>,
    pub budget_consumed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(config: &AgentConfig) -> Self {
        let now = Utc::now();
        Agent {
            id: crate::new_id(),
            team_id: config.team_id.clone(),
            model: config.model.clone(),
            task: config.task.clone(),
            status: AgentStatus::Pending,
            lifecycle_substate: AgentLifecycleSubstate::Initializing,
            retry_count: 0,
            max_retries: config.max_retries,
            version: 0,
            spawned_at: None,
            completed_at: None,
            last_error: None,
            worktree_path: None,
            budget_consumed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub team_id: Option<String>,
    pub model: String,
    pub task: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
