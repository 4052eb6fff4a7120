use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use orka_types::SessionNode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchState {
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ids of the nodes that belong to this branch, in append order. Newly
    /// forked branches start as a clone of their parent branch's members up
    /// to the fork point and diverge from there.
    pub members: Vec<String>,
}

/// Append-only node log for one agent, with git-like named branches.
/// `nodes` is the flat store of every node ever appended across every
/// branch; `BranchState::members` is what makes a branch a distinct view
/// over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub nodes: HashMap<String, SessionNode>,
    pub branches: HashMap<String, BranchState>,
    pub current_branch: String,
    /// Set only on a forked session: the node id (possibly from another
    /// session) this session's root node chains from.
    pub fork_origin: Option<String>,
    pub version: u64,
}

impl Session {
    pub fn new(id: String, agent_id: String) -> Self {
        let now = Utc::now();
        let mut branches = HashMap::new();
        branches.insert(
            "main".to_string(),
            BranchState {
                description: None,
                created_at: now,
                members: Vec::new(),
            },
        );
        Session {
            id,
            agent_id,
            nodes: HashMap::new(),
            branches,
            current_branch: "main".to_string(),
            fork_origin: None,
            version: 0,
        }
    }
}
