pub mod agent_state;
pub mod orchestrator;
pub mod registry;
pub mod team_state;

pub use orchestrator::{TeamExecutionResult, TeamOrchestrator};
pub use registry::AgentRegistry;
