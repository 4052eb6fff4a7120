use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{BranchComparison, BranchSummary, OrkaError, OrkaResult, SessionNode, SessionNodeType};
use serde_json::Value;

use crate::model::{BranchState, Session};

#[derive(Clone)]
pub struct SessionTree {
    sessions: Arc<Collection<Session>>,
    locks: KeyedLocks,
}

impl SessionTree {
    pub async fn open(base: &Path) -> anyhow::Result<Self> {
        Ok(SessionTree {
            sessions: Arc::new(Collection::open(base, "sessions").await?),
            locks: KeyedLocks::new(),
        })
    }

    pub async fn create_session(&self, agent_id: impl Into<String>) -> OrkaResult<Session> {
        let id = orka_types::new_id();
        let session = Session::new(id.clone(), agent_id.into());
        let row = self.sessions.insert(id, session).await?;
        Ok(row.data)
    }

    pub async fn get(&self, id: &str) -> OrkaResult<Session> {
        self.sessions
            .get(id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("session", id))
    }

    pub async fn append_message(&self, session_id: &str, payload: Value, cost: f64, tokens: u64) -> OrkaResult<SessionNode> {
        self.append(session_id, SessionNodeType::Message, payload, cost, tokens).await
    }

    pub async fn append_agent_action(&self, session_id: &str, payload: Value, cost: f64, tokens: u64) -> OrkaResult<SessionNode> {
        self.append(session_id, SessionNodeType::AgentAction, payload, cost, tokens).await
    }

    async fn append(
        &self,
        session_id: &str,
        node_type: SessionNodeType,
        payload: Value,
        cost: f64,
        tokens: u64,
    ) -> OrkaResult<SessionNode> {
        let _guard = self.locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        let expected_version = session.version;
        let branch = session.current_branch.clone();
        let parent_id = session
            .branches
            .get(&branch)
            .and_then(|b| b.members.last().cloned())
            .or_else(|| session.fork_origin.clone());

        let node = SessionNode {
            id: orka_types::new_id(),
            parent_id,
            node_type,
            timestamp: Utc::now(),
            payload,
            cost,
            tokens,
        };
        let node_for_return = node.clone();

        self.sessions
            .update_with_optimistic_lock(session_id, expected_version, |s| {
                s.nodes.insert(node.id.clone(), node.clone());
                if let Some(state) = s.branches.get_mut(&branch) {
                    state.members.push(node.id.clone());
                }
            })
            .await?;
        Ok(node_for_return)
    }

    pub async fn create_branch(&self, session_id: &str, name: &str, description: Option<String>) -> OrkaResult<()> {
        let _guard = self.locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        let expected_version = session.version;
        if session.branches.contains_key(name) {
            return Err(OrkaError::Validation(format!("branch `{name}` already exists")));
        }
        let members = session
            .branches
            .get(&session.current_branch)
            .map(|b| b.members.clone())
            .unwrap_or_default();
        let name = name.to_string();
        self.sessions
            .update_with_optimistic_lock(session_id, expected_version, |s| {
                s.branches.insert(
                    name,
                    BranchState {
                        description,
                        created_at: Utc::now(),
                        members,
                    },
                );
            })
            .await?;
        Ok(())
    }

    /// Branches off an explicit ancestor node rather than the current
    /// branch's head, walking `parent_id` links back to the root.
    pub async fn create_branch_at(&self, session_id: &str, node_id: &str, name: &str) -> OrkaResult<()> {
        let _guard = self.locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        let expected_version = session.version;
        if session.branches.contains_key(name) {
            return Err(OrkaError::Validation(format!("branch `{name}` already exists")));
        }
        if !session.nodes.contains_key(node_id) {
            return Err(OrkaError::not_found("session_node", node_id));
        }

        let mut members = Vec::new();
        let mut cursor = Some(node_id.to_string());
        while let Some(id) = cursor {
            members.push(id.clone());
            cursor = session.nodes.get(&id).and_then(|n| n.parent_id.clone());
        }
        members.reverse();

        let name = name.to_string();
        self.sessions
            .update_with_optimistic_lock(session_id, expected_version, |s| {
                s.branches.insert(
                    name,
                    BranchState {
                        description: None,
                        created_at: Utc::now(),
                        members,
                    },
                );
            })
            .await?;
        Ok(())
    }

    pub async fn switch_branch(&self, session_id: &str, name: &str) -> OrkaResult<()> {
        let _guard = self.locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        let expected_version = session.version;
        if !session.branches.contains_key(name) {
            return Err(OrkaError::not_found("branch", name));
        }
        let name = name.to_string();
        self.sessions
            .update_with_optimistic_lock(session_id, expected_version, |s| {
                s.current_branch = name;
            })
            .await?;
        Ok(())
    }

    /// Starts a new session chained from `from_node` without copying the
    /// source session's journal, only its branch names/descriptions.
    pub async fn fork_session(&self, session_id: &str, from_node: &str) -> OrkaResult<Session> {
        let source = self.get(session_id).await?;
        if !source.nodes.contains_key(from_node) {
            return Err(OrkaError::not_found("session_node", from_node));
        }
        let new_id = orka_types::new_id();
        let mut forked = Session::new(new_id.clone(), source.agent_id.clone());
        forked.current_branch = source.current_branch.clone();
        forked.fork_origin = Some(from_node.to_string());
        forked.branches = source
            .branches
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    BranchState {
                        description: state.description.clone(),
                        created_at: state.created_at,
                        members: Vec::new(),
                    },
                )
            })
            .collect();
        let row = self.sessions.insert(new_id, forked).await?;
        Ok(row.data)
    }

    pub async fn compare_branches(&self, session_id: &str, names: &[String]) -> OrkaResult<BranchComparison> {
        let session = self.get(session_id).await?;
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            let state = session
                .branches
                .get(name)
                .ok_or_else(|| OrkaError::not_found("branch", name))?;
            let mut aggregate_cost = 0.0;
            let mut aggregate_tokens = 0u64;
            let mut all_successful = true;
            for node_id in &state.members {
                let node = session
                    .nodes
                    .get(node_id)
                    .ok_or_else(|| OrkaError::not_found("session_node", node_id))?;
                aggregate_cost += node.cost;
                aggregate_tokens += node.tokens;
                if !node_is_successful(node) {
                    all_successful = false;
                }
            }
            summaries.push(BranchSummary {
                name: name.clone(),
                node_count: state.members.len(),
                aggregate_cost,
                aggregate_tokens,
                all_successful,
            });
        }

        let winner = summaries
            .iter()
            .filter(|s| s.all_successful)
            .min_by(|a, b| a.aggregate_cost.partial_cmp(&b.aggregate_cost).unwrap())
            .map(|s| s.name.clone());

        Ok(BranchComparison {
            branches: summaries,
            winner,
        })
    }
}

fn node_is_successful(node: &SessionNode) -> bool {
    node.payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn tree() -> (SessionTree, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-session-{}", uuid::Uuid::new_v4()));
        let tree = SessionTree::open(&dir).await.unwrap();
        (tree, dir)
    }

    #[tokio::test]
    async fn appended_nodes_chain_by_parent_id() {
        let (tree, dir) = tree().await;
        let session = tree.create_session("agent-1").await.unwrap();
        let n1 = tree.append_message(&session.id, json!({"text": "hi"}), 0.01, 5).await.unwrap();
        let n2 = tree.append_message(&session.id, json!({"text": "there"}), 0.02, 7).await.unwrap();
        assert_eq!(n1.parent_id, None);
        assert_eq!(n2.parent_id, Some(n1.id));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn branch_shares_history_up_to_fork_point() {
        let (tree, dir) = tree().await;
        let session = tree.create_session("agent-1").await.unwrap();
        tree.append_message(&session.id, json!({}), 0.0, 0).await.unwrap();
        tree.create_branch(&session.id, "experiment", None).await.unwrap();
        tree.switch_branch(&session.id, "experiment").await.unwrap();
        tree.append_message(&session.id, json!({}), 1.0, 10).await.unwrap();

        let compared = tree
            .compare_branches(&session.id, &["main".to_string(), "experiment".to_string()])
            .await
            .unwrap();
        let main = compared.branches.iter().find(|b| b.name == "main").unwrap();
        let experiment = compared.branches.iter().find(|b| b.name == "experiment").unwrap();
        assert_eq!(main.node_count, 1);
        assert_eq!(experiment.node_count, 2);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn compare_branches_picks_lowest_cost_successful_winner() {
        let (tree, dir) = tree().await;
        let session = tree.create_session("agent-1").await.unwrap();
        tree.append_message(&session.id, json!({"success": true}), 5.0, 10).await.unwrap();
        tree.create_branch(&session.id, "cheap", None).await.unwrap();
        tree.create_branch(&session.id, "failing", None).await.unwrap();
        tree.switch_branch(&session.id, "failing").await.unwrap();
        tree.append_message(&session.id, json!({"success": false}), 0.1, 1).await.unwrap();

        let compared = tree
            .compare_branches(&session.id, &["main".to_string(), "cheap".to_string(), "failing".to_string()])
            .await
            .unwrap();
        assert_eq!(compared.winner, Some("cheap".to_string()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn fork_session_does_not_copy_journal() {
        let (tree, dir) = tree().await;
        let session = tree.create_session("agent-1").await.unwrap();
        let node = tree.append_message(&session.id, json!({}), 0.0, 0).await.unwrap();
        let forked = tree.fork_session(&session.id, &node.id).await.unwrap();
        assert!(forked.nodes.is_empty());
        assert_eq!(forked.fork_origin, Some(node.id));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
