use orka_core::state_machine::StateMachine;
use orka_types::TeamStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamEvent {
    Start,
    Pause,
    Resume,
    ScaleStart,
    ScaleDone,
    Complete,
    Fail,
    Destroy,
}

/// Team status transitions: `createTeam` leaves a team in `creating`; the
/// remaining verbs map onto the transitions below. `destroy` is reachable
/// from every non-terminal status.
pub fn team_state_machine() -> StateMachine<TeamStatus, TeamEvent> {
    StateMachine::new("team")
        .allow(TeamStatus::Creating, TeamEvent::Start, TeamStatus::Active)
        .allow(TeamStatus::Active, TeamEvent::Pause, TeamStatus::Paused)
        .allow(TeamStatus::Paused, TeamEvent::Resume, TeamStatus::Active)
        .allow(TeamStatus::Active, TeamEvent::ScaleStart, TeamStatus::Scaling)
        .allow(TeamStatus::Scaling, TeamEvent::ScaleDone, TeamStatus::Active)
        .allow(TeamStatus::Active, TeamEvent::Complete, TeamStatus::Completed)
        .allow(TeamStatus::Active, TeamEvent::Fail, TeamStatus::Failed)
        .allow(TeamStatus::Scaling, TeamEvent::Fail, TeamStatus::Failed)
        .allow(TeamStatus::Creating, TeamEvent::Destroy, TeamStatus::Destroyed)
        .allow(TeamStatus::Active, TeamEvent::Destroy, TeamStatus::Destroyed)
        .allow(TeamStatus::Paused, TeamEvent::Destroy, TeamStatus::Destroyed)
        .allow(TeamStatus::Scaling, TeamEvent::Destroy, TeamStatus::Destroyed)
        .allow(TeamStatus::Failed, TeamEvent::Destroy, TeamStatus::Destroyed)
        .allow(TeamStatus::Completed, TeamEvent::Destroy, TeamStatus::Destroyed)
}

/// `ScaleStart`/`ScaleDone` never reach this: `scale_team` drives them
/// through `transition_status` directly and publishes its own single,
/// payload-bearing `team.scaled` event once scaling completes.
pub fn event_type_for(event: TeamEvent) -> &'static str {
    match event {
        TeamEvent::Start => "team.active",
        TeamEvent::Pause => "team.paused",
        TeamEvent::Resume => "team.resumed",
        TeamEvent::ScaleStart | TeamEvent::ScaleDone => "team.scaled",
        TeamEvent::Complete => "team.completed",
        TeamEvent::Fail => "team.failed",
        TeamEvent::Destroy => "team.destroyed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_only_allows_start_or_destroy() {
        let sm = team_state_machine();
        assert!(sm.is_allowed(&TeamStatus::Creating, &TeamEvent::Start));
        assert!(sm.is_allowed(&TeamStatus::Creating, &TeamEvent::Destroy));
        assert!(!sm.is_allowed(&TeamStatus::Creating, &TeamEvent::Pause));
    }

    #[test]
    fn destroyed_is_terminal() {
        assert!(TeamStatus::Destroyed.is_terminal());
    }
}
