use std::path::Path;
use std::sync::Arc;

use orka_agents::{AgentRegistry, TeamOrchestrator};
use orka_budget::BudgetManager;
use orka_core::config::AppConfig;
use orka_core::event_bus::EventBus;
use orka_core::storage::Collection;
use orka_federation::FederationRouter;
use orka_session::SessionTree;
use orka_supervisor::Supervisor;
use orka_types::IdempotencyRecord;
use orka_workflow::WorkflowEngine;

/// Everything a route handler needs, wired once at startup. Each field is
/// independently clonable/cheap to share (`Arc`/internal `Arc` already), so
/// `AppState` itself derives `Clone` rather than being wrapped in an `Arc`
/// at the call site.
#[derive(Clone)]
pub struct AppState {
    pub agents: AgentRegistry,
    pub teams: TeamOrchestrator,
    pub workflows: WorkflowEngine,
    pub budgets: BudgetManager,
    pub federation: FederationRouter,
    pub sessions: SessionTree,
    pub supervisor: Supervisor,
    pub events: EventBus,
    pub idempotency: Arc<Collection<IdempotencyRecord>>,
}

impl AppState {
    pub async fn open(base: &Path, config: AppConfig) -> anyhow::Result<Self> {
        let events = EventBus::open(base, config.event_bus.clone()).await?;
        let agents = AgentRegistry::open(base, events.clone()).await?;
        let teams = TeamOrchestrator::open(base, events.clone(), agents.clone()).await?;
        let workflows = WorkflowEngine::open(base, events.clone()).await?;
        let budgets = BudgetManager::open(base, events.clone(), config.budget.clone()).await?;
        let federation = FederationRouter::open(base, config.federation.health_thresholds.clone()).await?;
        let sessions = SessionTree::open(base).await?;
        let supervisor = Supervisor::new(events.clone());
        let idempotency = Arc::new(Collection::open(base, "idempotency_keys").await?);

        Ok(AppState {
            agents,
            teams,
            workflows,
            budgets,
            federation,
            sessions,
            supervisor,
            events,
            idempotency,
        })
    }

    /// Returns a previously-recorded result for `key`, if any, so create/
    /// update handlers can replay it instead of re-running.
    pub async fn idempotent_replay(&self, key: &str) -> Option<serde_json::Value> {
        self.idempotency.get(key).await.map(|row| row.data.result)
    }

    pub async fn record_idempotent_result(&self, key: &str, result: serde_json::Value) {
        let record = IdempotencyRecord {
            key: key.to_string(),
            result,
            created_at: chrono::Utc::now(),
        };
        let _ = self.idempotency.insert(key.to_string(), record).await;
    }
}
