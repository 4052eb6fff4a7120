use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Retrying,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    Fail,
    Continue,
}

impl Default for OnErrorPolicy {
    fn default() -> Self {
        OnErrorPolicy::Fail
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepSpec {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub agent_selector: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepState {
    pub spec: WorkflowStepSpec,
    pub status: StepStatus,
    pub retry_count: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowStepState {
    pub fn new(spec: WorkflowStepSpec) -> Self {
        WorkflowStepState {
            spec,
            status: StepStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub steps: Vec<WorkflowStepSpec>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub team_id: Option<String>,
}

fn default_max_concurrency() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub steps: HashMap<String, WorkflowStepState>,
    pub status: WorkflowStatus,
    pub context: HashMap<String, Value>,
    pub team_id: Option<String>,
    pub max_concurrency: u32,
    pub on_error: OnErrorPolicy,
    pub timeout_ms: Option<u64>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
