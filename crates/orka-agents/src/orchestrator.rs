use std::path::Path;
use std::sync::Arc;

use orka_core::event_bus::EventBus;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{
    Agent, AgentConfig, AgentEvent, AgentStatus, ExecutionStrategy, NewEvent, OrkaError,
    OrkaResult, Team, TeamConfig, TeamStatus,
};

use crate::registry::AgentRegistry;
use crate::team_state::{event_type_for, team_state_machine, TeamEvent};

#[derive(Debug, Clone, serde::Serialize)]
pub struct TeamExecutionResult {
    pub completed: bool,
    pub failed: bool,
    pub per_agent: Vec<(String, AgentStatus)>,
}

/// Here meaning "the agent has stopped advancing on its own": either truly
/// terminal, or `failed` with no retries left. `AgentStatus::Failed` alone
/// does not qualify since a caller may still issue `retry`.
fn agent_is_settled(agent: &Agent) -> bool {
    agent.status.is_terminal()
        || (agent.status == AgentStatus::Failed && agent.retry_count >= agent.max_retries)
}

/// `createTeam`/.../`executeStrategy`. Team mutations are serialized per
/// team id the same way `AgentRegistry` serializes per agent id; agent
/// lifecycle itself is delegated to `AgentRegistry`.
#[derive(Clone)]
pub struct TeamOrchestrator {
    teams: Arc<Collection<Team>>,
    locks: KeyedLocks,
    events: EventBus,
    agents: AgentRegistry,
}

impl TeamOrchestrator {
    pub async fn open(base: &Path, events: EventBus, agents: AgentRegistry) -> anyhow::Result<Self> {
        Ok(TeamOrchestrator {
            teams: Arc::new(Collection::open(base, "teams").await?),
            locks: KeyedLocks::new(),
            events,
            agents,
        })
    }

    pub async fn get(&self, id: &str) -> OrkaResult<Team> {
        self.teams
            .get(id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("team", id))
    }

    pub async fn create_team(&self, config: TeamConfig) -> OrkaResult<Team> {
        let team = Team::new(config);
        let row = self.teams.insert(team.id.clone(), team).await?;
        self.events
            .publish(NewEvent::new("team.created", "team_orchestrator").with_metadata(
                orka_types::EventMetadata {
                    team_id: Some(row.data.id.clone()),
                    ..Default::default()
                },
            ))
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(row.data)
    }

    /// Runs the status transition only, with no event published. Used where
    /// the caller itself owns the externally-visible event for this step
    /// (`scale_team`'s `ScaleStart`/`ScaleDone` bookkeeping, which must not
    /// surface as its own `team.scaled` alongside the caller's payload-bearing
    /// one).
    async fn transition_status(&self, id: &str, event: TeamEvent) -> OrkaResult<Team> {
        let _guard = self.locks.lock(id).await;
        let sm = team_state_machine();
        let current = self.get(id).await?;
        let to = sm.check(&current.status, &event)?;
        let row = self
            .teams
            .update_with_optimistic_lock(id, current.version, |team| team.status = to)
            .await?;
        Ok(row.data)
    }

    async fn apply_event(&self, id: &str, event: TeamEvent) -> OrkaResult<Team> {
        let team = self.transition_status(id, event).await?;
        self.events
            .publish(
                NewEvent::new(event_type_for(event), "team_orchestrator").with_metadata(
                    orka_types::EventMetadata {
                        team_id: Some(id.to_string()),
                        ..Default::default()
                    },
                ),
            )
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(team)
    }

    pub async fn start_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Start).await
    }

    pub async fn pause_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Pause).await
    }

    pub async fn resume_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Resume).await
    }

    pub async fn complete_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Complete).await
    }

    pub async fn fail_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Fail).await
    }

    pub async fn destroy_team(&self, id: &str) -> OrkaResult<Team> {
        self.apply_event(id, TeamEvent::Destroy).await
    }

    pub async fn add_agent(&self, team_id: &str, config: AgentConfig) -> OrkaResult<Agent> {
        let _guard = self.locks.lock(team_id).await;
        let team = self.get(team_id).await?;
        if team.agent_ids.len() as u32 >= team.max_agents {
            return Err(OrkaError::Validation(format!(
                "team {team_id} already at max_agents ({})",
                team.max_agents
            )));
        }
        let mut config = config;
        config.team_id = Some(team_id.to_string());
        let agent = self.agents.register(config).await?;
        self.teams
            .update_with_optimistic_lock(team_id, team.version, |t| {
                t.agent_ids.push(agent.id.clone())
            })
            .await?;
        Ok(agent)
    }

    pub async fn remove_agent(&self, team_id: &str, agent_id: &str) -> OrkaResult<Team> {
        let _guard = self.locks.lock(team_id).await;
        let team = self.get(team_id).await?;
        let row = self
            .teams
            .update_with_optimistic_lock(team_id, team.version, |t| {
                t.agent_ids.retain(|id| id != agent_id)
            })
            .await?;
        Ok(row.data)
    }

    /// `delta > 0` spawns via `spawn_config`; `delta < 0` kills `|delta|`
    /// agents chosen by priority idle-over-running, then higher retry-count,
    /// then oldest `spawned_at`.
    pub async fn scale_team(
        &self,
        team_id: &str,
        target: u32,
        spawn_config: impl Fn() -> AgentConfig,
    ) -> OrkaResult<Team> {
        let team = self.transition_status(team_id, TeamEvent::ScaleStart).await?;
        let current = team.agent_ids.len() as i64;
        let delta = target as i64 - current;

        if delta > 0 {
            for _ in 0..delta {
                self.add_agent(team_id, spawn_config()).await?;
            }
        } else if delta < 0 {
            let mut candidates = self.agents.get_by_team(team_id).await;
            candidates.retain(|a| !a.status.is_terminal());
            candidates.sort_by(|a, b| {
                let idle_rank = |s: AgentStatus| matches!(s, AgentStatus::Paused | AgentStatus::Pending) as u8;
                idle_rank(b.status)
                    .cmp(&idle_rank(a.status))
                    .then(b.retry_count.cmp(&a.retry_count))
                    .then(a.spawned_at.cmp(&b.spawned_at))
            });
            for agent in candidates.into_iter().take((-delta) as usize) {
                self.agents.transition(&agent.id, AgentEvent::Kill).await?;
                self.remove_agent(team_id, &agent.id).await?;
            }
        }

        let updated = self.transition_status(team_id, TeamEvent::ScaleDone).await?;
        self.events
            .publish(
                NewEvent::new("team.scaled", "team_orchestrator")
                    .with_payload(serde_json::json!({ "previous": current, "new": target }))
                    .with_metadata(orka_types::EventMetadata {
                        team_id: Some(team_id.to_string()),
                        ..Default::default()
                    }),
            )
            .await
            .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
        Ok(updated)
    }

    /// Aggregates agent outcomes per the team's `ExecutionStrategy`. Does
    /// not itself drive agent task execution, that lives outside this
    /// control plane, only evaluates whether the strategy's
    /// completion/failure predicate currently holds.
    pub async fn execute_strategy(&self, team_id: &str) -> OrkaResult<TeamExecutionResult> {
        let team = self.get(team_id).await?;
        let members = self.agents.get_by_team(team_id).await;
        let per_agent: Vec<(String, AgentStatus)> =
            members.iter().map(|a| (a.id.clone(), a.status)).collect();

        let result = match &team.strategy {
            ExecutionStrategy::Parallel => {
                let all_settled = members.iter().all(agent_is_settled);
                let all_failed = !members.is_empty() && members.iter().all(|a| a.status == AgentStatus::Failed);
                TeamExecutionResult {
                    completed: all_settled && !all_failed,
                    failed: all_failed,
                    per_agent,
                }
            }
            ExecutionStrategy::MapReduce { reducer_step } => {
                let reducer = members.iter().find(|a| &a.id == reducer_step);
                let chunks_settled = members
                    .iter()
                    .filter(|a| &a.id != reducer_step)
                    .all(agent_is_settled);
                let reducer_done = reducer.map(|a| a.status == AgentStatus::Completed).unwrap_or(false);
                let reducer_failed = reducer
                    .map(|a| a.status == AgentStatus::Failed || a.status == AgentStatus::Killed)
                    .unwrap_or(false);
                TeamExecutionResult {
                    completed: chunks_settled && reducer_done,
                    failed: reducer_failed,
                    per_agent,
                }
            }
            ExecutionStrategy::Pipeline { stages } => {
                let mut failed = false;
                let mut completed = true;
                for stage in stages {
                    let stage_agents: Vec<&Agent> =
                        members.iter().filter(|a| stage.contains(&a.id)).collect();
                    if stage_agents.iter().any(|a| a.status == AgentStatus::Failed || a.status == AgentStatus::Killed) {
                        failed = true;
                        completed = false;
                        break;
                    }
                    if !stage_agents.iter().all(|a| a.status == AgentStatus::Completed) {
                        completed = false;
                        break;
                    }
                }
                TeamExecutionResult { completed, failed, per_agent }
            }
            ExecutionStrategy::Tree { max_depth } => {
                // Parent/child spawn links are not modeled on `Agent`
                // (out of scope); completion is evaluated over the flat
                // team membership with `max_depth` only bounding `scaleTeam`
                // growth elsewhere.
                let _ = max_depth;
                let all_settled = members.iter().all(agent_is_settled);
                let all_failed = !members.is_empty() && members.iter().all(|a| a.status == AgentStatus::Failed);
                TeamExecutionResult {
                    completed: all_settled && !all_failed,
                    failed: all_failed,
                    per_agent,
                }
            }
        };

        if result.failed {
            self.fail_team(team_id).await.ok();
        } else if result.completed {
            self.complete_team(team_id).await.ok();
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_core::config::EventBusConfig;

    async fn harness() -> (TeamOrchestrator, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-orchestrator-{}", uuid::Uuid::new_v4()));
        let events = EventBus::open(&dir, EventBusConfig::default()).await.unwrap();
        let agents = AgentRegistry::open(&dir, events.clone()).await.unwrap();
        let orchestrator = TeamOrchestrator::open(&dir, events, agents).await.unwrap();
        (orchestrator, dir)
    }

    fn team_config() -> TeamConfig {
        TeamConfig {
            name: "release-team".to_string(),
            description: None,
            strategy: ExecutionStrategy::Parallel,
            budget_allocated: None,
            max_agents: 5,
            metadata: Default::default(),
        }
    }

    fn agent_config() -> AgentConfig {
        AgentConfig {
            team_id: None,
            model: "gpt-test".to_string(),
            task: "chunk".to_string(),
            max_retries: 1,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn create_and_start_team() {
        let (orch, dir) = harness().await;
        let team = orch.create_team(team_config()).await.unwrap();
        assert_eq!(team.status, TeamStatus::Creating);
        let started = orch.start_team(&team.id).await.unwrap();
        assert_eq!(started.status, TeamStatus::Active);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn add_agent_respects_max_agents() {
        let (orch, dir) = harness().await;
        let mut config = team_config();
        config.max_agents = 1;
        let team = orch.create_team(config).await.unwrap();
        orch.add_agent(&team.id, agent_config()).await.unwrap();
        let err = orch.add_agent(&team.id, agent_config()).await.unwrap_err();
        assert!(matches!(err, OrkaError::Validation(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn scale_team_up_then_down() {
        let (orch, dir) = harness().await;
        let team = orch.create_team(team_config()).await.unwrap();
        orch.start_team(&team.id).await.unwrap();
        let scaled = orch.scale_team(&team.id, 3, agent_config).await.unwrap();
        assert_eq!(scaled.agent_ids.len(), 3);
        let scaled_down = orch.scale_team(&team.id, 1, agent_config).await.unwrap();
        assert_eq!(scaled_down.agent_ids.len(), 1);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn parallel_strategy_completes_when_all_agents_done() {
        let (orch, dir) = harness().await;
        let team = orch.create_team(team_config()).await.unwrap();
        orch.start_team(&team.id).await.unwrap();
        let agent = orch.add_agent(&team.id, agent_config()).await.unwrap();
        orch.agents.transition(&agent.id, AgentEvent::Spawn).await.unwrap();
        orch.agents.transition(&agent.id, AgentEvent::WorktreeReady).await.unwrap();
        orch.agents.transition(&agent.id, AgentEvent::SessionStarted).await.unwrap();
        orch.agents.transition(&agent.id, AgentEvent::TaskComplete).await.unwrap();
        orch.agents.transition(&agent.id, AgentEvent::CleanupDone).await.unwrap();

        let result = orch.execute_strategy(&team.id).await.unwrap();
        assert!(result.completed);
        assert!(!result.failed);
        let team_after = orch.get(&team.id).await.unwrap();
        assert_eq!(team_after.status, TeamStatus::Completed);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
