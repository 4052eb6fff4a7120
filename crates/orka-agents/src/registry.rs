use std::path::Path;
use std::sync::Arc;

use orka_core::event_bus::EventBus;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{Agent, AgentConfig, AgentEvent, AgentStatus, NewEvent, OrkaError, OrkaResult};

use crate::agent_state::{agent_state_machine, event_type_for, substate_after};

/// `register`/`transition`/`updateState`/`find`. Mutating calls are
/// serialized per agent id through `locks`; reads go straight to the
/// collection and may observe a slightly stale snapshot under concurrent
/// writers, an accepted tradeoff for read throughput.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<Collection<Agent>>,
    locks: KeyedLocks,
    events: EventBus,
}

impl AgentRegistry {
    pub async fn open(base: &Path, events: EventBus) -> anyhow::Result<Self> {
        Ok(AgentRegistry {
            agents: Arc::new(Collection::open(base, "agents").await?),
            locks: KeyedLocks::new(),
            events,
        })
    }

    pub async fn register(&self, config: AgentConfig) -> OrkaResult<Agent> {
        let agent = Agent::new(&config);
        let _guard = self.locks.lock(&agent.id).await;
        let row = self.agents.insert(agent.id.clone(), agent).await?;
        self.events
            .publish(
                NewEvent::new("agent.registered", "agent_registry").with_metadata(
                    orka_types::EventMetadata {
                        agent_id: Some(row.data.id.clone()),
                        team_id: row.data.team_id.clone(),
                        ..Default::default()
                    },
                ),
            )
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(row.data)
    }

    pub async fn get_by_id(&self, id: &str) -> OrkaResult<Agent> {
        self.agents
            .get(id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("agent", id))
    }

    pub async fn get_by_team(&self, team_id: &str) -> Vec<Agent> {
        self.agents
            .list()
            .await
            .into_iter()
            .map(|(_, row)| row.data)
            .filter(|a| a.team_id.as_deref() == Some(team_id))
            .collect()
    }

    pub async fn find(&self, predicate: impl Fn(&Agent) -> bool) -> Vec<Agent> {
        self.agents
            .list()
            .await
            .into_iter()
            .map(|(_, row)| row.data)
            .filter(|a| predicate(a))
            .collect()
    }

    /// Validates and applies `event` to agent `id`, emitting the matching
    /// dotted event type. `Retry` is only accepted while
    /// `retry_count < max_retries`, and `retry_count` is incremented as part
    /// of accepting that `Retry` itself (mirroring `WorkflowEngine::fail_step`,
    /// which checks exhaustion before bumping its own counter) so that with
    /// `max_retries = N` exactly `N` retries are observable before a
    /// subsequent `Error` is rejected and the caller must `Kill` instead.
    pub async fn transition(&self, id: &str, event: AgentEvent) -> OrkaResult<Agent> {
        let _guard = self.locks.lock(id).await;
        let sm = agent_state_machine();

        let current = self.get_by_id(id).await?;
        if current.status.is_terminal() {
            return Err(OrkaError::invalid_transition(
                "agent",
                id,
                format!("{:?}", current.status),
                format!("{event:?}"),
            ));
        }
        if matches!(event, AgentEvent::Retry) && current.retry_count >= current.max_retries {
            return Err(OrkaError::invalid_transition(
                "agent",
                id,
                format!("{:?}", current.status),
                "retry (exhausted)".to_string(),
            ));
        }

        let to = sm.check(&current.status, &event)?;
        let substate = substate_after(&event, current.lifecycle_substate);
        let expected_version = current.version;

        let row = self
            .agents
            .update_with_optimistic_lock(id, expected_version, |agent| {
                agent.status = to;
                agent.lifecycle_substate = substate;
                match event {
                    AgentEvent::Retry => {
                        agent.retry_count += 1;
                    }
                    AgentEvent::WorktreeReady if agent.spawned_at.is_none() => {
                        agent.spawned_at = Some(chrono::Utc::now());
                    }
                    AgentEvent::CleanupDone | AgentEvent::Kill => {
                        agent.completed_at = Some(chrono::Utc::now());
                    }
                    _ => {}
                }
            })
            .await?;

        self.events
            .publish(
                NewEvent::new(event_type_for(&event, to), "agent_registry").with_metadata(
                    orka_types::EventMetadata {
                        agent_id: Some(id.to_string()),
                        team_id: row.data.team_id.clone(),
                        ..Default::default()
                    },
                ),
            )
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;

        Ok(row.data)
    }

    /// Records a failure reason before the caller raises the matching
    /// `AgentEvent::Error`/`CleanupError` transition.
    pub async fn record_error(&self, id: &str, message: impl Into<String>) -> OrkaResult<Agent> {
        let message = message.into();
        let row = self.agents.update(id, |agent| agent.last_error = Some(message)).await?;
        Ok(row.data)
    }

    pub async fn set_worktree_path(&self, id: &str, path: impl Into<String>) -> OrkaResult<Agent> {
        let path = path.into();
        let row = self.agents.update(id, |agent| agent.worktree_path = Some(path)).await?;
        Ok(row.data)
    }

    /// Either every row lands, or already-applied rows are reverted to
    /// their pre-call snapshot.
    pub async fn create_many(&self, configs: Vec<AgentConfig>) -> OrkaResult<Vec<Agent>> {
        let mut created = Vec::with_capacity(configs.len());
        for config in configs {
            match self.register(config).await {
                Ok(agent) => created.push(agent),
                Err(err) => {
                    for agent in &created {
                        let _ = self.agents.remove(&agent.id).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(created)
    }

    pub async fn update_many(
        &self,
        updates: Vec<(String, AgentStatus)>,
    ) -> OrkaResult<Vec<Agent>> {
        let mut previous = Vec::with_capacity(updates.len());
        let mut applied = Vec::with_capacity(updates.len());
        for (id, status) in &updates {
            let before = self.get_by_id(id).await?;
            previous.push(before.clone());
            match self
                .agents
                .update_with_optimistic_lock(id, before.version, |a| a.status = *status)
                .await
            {
                Ok(row) => applied.push(row.data),
                Err(err) => {
                    for snapshot in &previous {
                        let _ = self
                            .agents
                            .update(&snapshot.id, |a| *a = snapshot.clone())
                            .await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_core::config::EventBusConfig;

    async fn registry() -> (AgentRegistry, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-agents-{}", uuid::Uuid::new_v4()));
        let events = EventBus::open(&dir, EventBusConfig::default()).await.unwrap();
        let registry = AgentRegistry::open(&dir, events).await.unwrap();
        (registry, dir)
    }

    fn config() -> AgentConfig {
        AgentConfig {
            team_id: None,
            model: "gpt-test".to_string(),
            task: "write tests".to_string(),
            max_retries: 1,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn register_persists_pending_agent() {
        let (registry, dir) = registry().await;
        let agent = registry.register(config()).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Pending);
        let fetched = registry.get_by_id(&agent.id).await.unwrap();
        assert_eq!(fetched.id, agent.id);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn full_happy_path_reaches_completed() {
        let (registry, dir) = registry().await;
        let agent = registry.register(config()).await.unwrap();
        registry.transition(&agent.id, AgentEvent::Spawn).await.unwrap();
        registry.transition(&agent.id, AgentEvent::WorktreeReady).await.unwrap();
        registry.transition(&agent.id, AgentEvent::SessionStarted).await.unwrap();
        registry.transition(&agent.id, AgentEvent::TaskComplete).await.unwrap();
        let final_agent = registry.transition(&agent.id, AgentEvent::CleanupDone).await.unwrap();
        assert_eq!(final_agent.status, AgentStatus::Completed);
        assert_eq!(final_agent.retry_count, 0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn retry_exhausted_transitions_to_terminal_failed() {
        let (registry, dir) = registry().await;
        let agent = registry.register(config()).await.unwrap();
        registry.transition(&agent.id, AgentEvent::Spawn).await.unwrap();
        registry.transition(&agent.id, AgentEvent::WorktreeReady).await.unwrap();
        registry.transition(&agent.id, AgentEvent::SessionStarted).await.unwrap();
        registry.transition(&agent.id, AgentEvent::Error).await.unwrap();
        let retried = registry.transition(&agent.id, AgentEvent::Retry).await.unwrap();
        assert_eq!(retried.status, AgentStatus::Running);
        assert_eq!(retried.retry_count, 1);
        let failed_again = registry.transition(&agent.id, AgentEvent::Error).await.unwrap();
        assert_eq!(failed_again.status, AgentStatus::Failed);
        let err = registry.transition(&agent.id, AgentEvent::Retry).await.unwrap_err();
        assert!(matches!(err, OrkaError::InvalidTransition { .. }));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn terminal_agent_rejects_further_transitions() {
        let (registry, dir) = registry().await;
        let agent = registry.register(config()).await.unwrap();
        registry.transition(&agent.id, AgentEvent::Kill).await.unwrap();
        let err = registry.transition(&agent.id, AgentEvent::Spawn).await.unwrap_err();
        assert!(matches!(err, OrkaError::InvalidTransition { .. }));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
