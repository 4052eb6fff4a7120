use orka_core::state_machine::StateMachine;
use orka_types::{AgentEvent, AgentLifecycleSubstate, AgentStatus};

/// Coarse status transitions for the agent lifecycle. Finer-grained
/// substate movement (`initializing` → `spawning` → `executing` → ...) is not
/// part of this table since the substates are UI/debug-only and several of
/// them map onto the same `AgentStatus`; `substate_after` derives the right
/// one for each accepted transition.
pub fn agent_state_machine() -> StateMachine<AgentStatus, AgentEvent> {
    StateMachine::new("agent")
        .allow(AgentStatus::Pending, AgentEvent::Spawn, AgentStatus::Initializing)
        .allow(AgentStatus::Initializing, AgentEvent::WorktreeReady, AgentStatus::Initializing)
        .allow(AgentStatus::Initializing, AgentEvent::SessionStarted, AgentStatus::Running)
        .allow(AgentStatus::Running, AgentEvent::TaskComplete, AgentStatus::Running)
        .allow(AgentStatus::Running, AgentEvent::CleanupDone, AgentStatus::Completed)
        .allow(AgentStatus::Running, AgentEvent::CleanupError, AgentStatus::Failed)
        .allow(AgentStatus::Running, AgentEvent::Error, AgentStatus::Failed)
        .allow(AgentStatus::Running, AgentEvent::Pause, AgentStatus::Paused)
        .allow(AgentStatus::Paused, AgentEvent::Resume, AgentStatus::Running)
        .allow(AgentStatus::Failed, AgentEvent::Retry, AgentStatus::Running)
        .allow(AgentStatus::Pending, AgentEvent::Kill, AgentStatus::Killed)
        .allow(AgentStatus::Initializing, AgentEvent::Kill, AgentStatus::Killed)
        .allow(AgentStatus::Running, AgentEvent::Kill, AgentStatus::Killed)
        .allow(AgentStatus::Paused, AgentEvent::Kill, AgentStatus::Killed)
        .allow(AgentStatus::Failed, AgentEvent::Kill, AgentStatus::Killed)
}

pub fn substate_after(event: &AgentEvent, current: AgentLifecycleSubstate) -> AgentLifecycleSubstate {
    match event {
        AgentEvent::Spawn => AgentLifecycleSubstate::Initializing,
        AgentEvent::WorktreeReady => AgentLifecycleSubstate::Spawning,
        AgentEvent::SessionStarted => AgentLifecycleSubstate::Executing,
        AgentEvent::TaskComplete => AgentLifecycleSubstate::Completing,
        AgentEvent::CleanupDone => AgentLifecycleSubstate::Completed,
        AgentEvent::CleanupError => AgentLifecycleSubstate::Failed,
        AgentEvent::Error => AgentLifecycleSubstate::Failed,
        AgentEvent::Pause => AgentLifecycleSubstate::Paused,
        AgentEvent::Resume => AgentLifecycleSubstate::Executing,
        AgentEvent::Retry => AgentLifecycleSubstate::Executing,
        AgentEvent::Kill => current,
    }
}

/// Event type string emitted for a given `(from, event, to)` transition.
pub fn event_type_for(event: &AgentEvent, to: AgentStatus) -> &'static str {
    match (event, to) {
        (AgentEvent::Spawn, _) => "agent.spawning",
        (AgentEvent::WorktreeReady, _) => "agent.spawning",
        (AgentEvent::SessionStarted, _) => "agent.running",
        (AgentEvent::TaskComplete, _) => "agent.completing",
        (AgentEvent::CleanupDone, _) => "agent.completed",
        (AgentEvent::CleanupError, _) => "agent.failed",
        (AgentEvent::Error, _) => "agent.failed",
        (AgentEvent::Pause, _) => "agent.paused",
        (AgentEvent::Resume, _) => "agent.resumed",
        (AgentEvent::Retry, _) => "agent.retrying",
        (AgentEvent::Kill, _) => "agent.killed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence_is_allowed() {
        let sm = agent_state_machine();
        let mut state = AgentStatus::Pending;
        state = sm.check(&state, &AgentEvent::Spawn).unwrap();
        state = sm.check(&state, &AgentEvent::WorktreeReady).unwrap();
        state = sm.check(&state, &AgentEvent::SessionStarted).unwrap();
        state = sm.check(&state, &AgentEvent::TaskComplete).unwrap();
        state = sm.check(&state, &AgentEvent::CleanupDone).unwrap();
        assert_eq!(state, AgentStatus::Completed);
    }

    #[test]
    fn completed_is_terminal() {
        let sm = agent_state_machine();
        assert!(!sm.is_allowed(&AgentStatus::Completed, &AgentEvent::Spawn));
        assert!(!sm.is_allowed(&AgentStatus::Killed, &AgentEvent::Resume));
    }

    #[test]
    fn retry_returns_to_running_from_failed() {
        let sm = agent_state_machine();
        let state = sm.check(&AgentStatus::Failed, &AgentEvent::Retry).unwrap();
        assert_eq!(state, AgentStatus::Running);
    }
}
