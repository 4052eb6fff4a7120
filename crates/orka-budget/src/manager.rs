use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use orka_core::config::BudgetConfig;
use orka_core::event_bus::EventBus;
use orka_core::storage::Collection;
use orka_core::stripe_lock::KeyedLocks;
use orka_types::{Budget, BudgetLevel, EventMetadata, NewEvent, OrkaError, OrkaResult};

/// Enforces spend limits across the agent -> team -> project -> organization
/// chain. `consume` walks the chain collecting every ancestor's current row
/// before committing any debit, so a failure at level N never partially
/// debits levels below it.
#[derive(Clone)]
pub struct BudgetManager {
    budgets: Arc<Collection<Budget>>,
    locks: KeyedLocks,
    events: EventBus,
    config: BudgetConfig,
}

impl BudgetManager {
    pub async fn open(base: &Path, events: EventBus, config: BudgetConfig) -> anyhow::Result<Self> {
        Ok(BudgetManager {
            budgets: Arc::new(Collection::open(base, "budgets").await?),
            locks: KeyedLocks::new(),
            events,
            config,
        })
    }

    pub async fn create_budget(
        &self,
        entity_id: impl Into<String>,
        level: BudgetLevel,
        parent_entity_id: Option<String>,
        total: i64,
        currency: impl Into<String>,
    ) -> OrkaResult<Budget> {
        let entity_id = entity_id.into();
        let now = Utc::now();
        let budget = Budget {
            entity_id: entity_id.clone(),
            level,
            parent_entity_id,
            total,
            consumed: 0,
            period_start: now,
            period_end: None,
            currency: currency.into(),
            crossed_thresholds: Vec::new(),
            version: 0,
        };
        let row = self.budgets.insert(entity_id, budget).await?;
        Ok(row.data)
    }

    pub async fn get(&self, entity_id: &str) -> OrkaResult<Budget> {
        self.budgets
            .get(entity_id)
            .await
            .map(|row| row.data)
            .ok_or_else(|| OrkaError::not_found("budget", entity_id))
    }

    /// Checks every ancestor in the chain has room for `amount`, then debits
    /// all of them. Locks are acquired leaf-to-root and released in the
    /// reverse order automatically on drop; no partial debit is ever
    /// observable because the whole chain is verified before any write.
    pub async fn consume(&self, entity_id: &str, amount: i64) -> OrkaResult<()> {
        let chain = self.load_chain(entity_id).await?;
        let mut guards = Vec::with_capacity(chain.len());
        for id in &chain {
            guards.push(self.locks.lock(id).await);
        }

        for id in &chain {
            let budget = self.get(id).await?;
            if budget.remaining() < amount {
                return Err(OrkaError::BudgetExceeded {
                    level: format!("{:?}", budget.level),
                    consumed: budget.consumed,
                    total: budget.total,
                });
            }
        }

        for id in &chain {
            let budget = self.get(id).await?;
            let expected_version = budget.version;
            let new_consumed = budget.consumed + amount;
            let crossed = self.newly_crossed_thresholds(&budget, new_consumed);
            let updated = self
                .budgets
                .update_with_optimistic_lock(id, expected_version, |b| {
                    b.consumed = new_consumed;
                    b.crossed_thresholds.extend(crossed.iter().map(|(t, _)| *t));
                })
                .await?;
            for (threshold, event_type) in crossed {
                self.events
                    .publish(
                        NewEvent::new(event_type, "budget_manager")
                            .with_payload(serde_json::json!({
                                "entity_id": updated.data.entity_id,
                                "level": updated.data.level,
                                "threshold": threshold,
                                "consumed": updated.data.consumed,
                                "total": updated.data.total,
                            }))
                            .with_metadata(EventMetadata::default()),
                    )
                    .await
                    .map_err(|e| OrkaError::TransientStore(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Resets `consumed` and `crossed_thresholds` for a new period, keeping
    /// `total`. Used by the autonomic loop / an external scheduler, not
    /// called from `consume` itself.
    pub async fn reset_period(&self, entity_id: &str) -> OrkaResult<Budget> {
        let budget = self.get(entity_id).await?;
        let expected_version = budget.version;
        let now = Utc::now();
        let row = self
            .budgets
            .update_with_optimistic_lock(entity_id, expected_version, |b| {
                b.consumed = 0;
                b.crossed_thresholds.clear();
                b.period_start = now;
            })
            .await?;
        Ok(row.data)
    }

    fn newly_crossed_thresholds(&self, budget: &Budget, new_consumed: i64) -> Vec<(u8, &'static str)> {
        let utilization = if budget.total <= 0 {
            0.0
        } else {
            new_consumed as f64 / budget.total as f64
        };
        let mut crossed = Vec::new();
        let warning_pct = (self.config.warning_threshold * 100.0).round() as u8;
        let critical_pct = (self.config.critical_threshold * 100.0).round() as u8;
        if utilization >= self.config.warning_threshold && !budget.crossed_thresholds.contains(&warning_pct) {
            crossed.push((warning_pct, "budget.warning"));
        }
        if utilization >= self.config.critical_threshold && !budget.crossed_thresholds.contains(&critical_pct) {
            crossed.push((critical_pct, "budget.critical"));
        }
        crossed
    }

    async fn load_chain(&self, entity_id: &str) -> OrkaResult<Vec<String>> {
        let mut chain = vec![entity_id.to_string()];
        let mut current = self.get(entity_id).await?;
        while let Some(parent_id) = current.parent_entity_id.clone() {
            chain.push(parent_id.clone());
            current = self.get(&parent_id).await?;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (BudgetManager, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-budget-{}", uuid::Uuid::new_v4()));
        let events = EventBus::open(&dir, Default::default()).await.unwrap();
        let manager = BudgetManager::open(&dir, events, BudgetConfig::default()).await.unwrap();
        (manager, dir)
    }

    #[tokio::test]
    async fn consume_debits_every_ancestor() {
        let (mgr, dir) = manager().await;
        mgr.create_budget("org-1", BudgetLevel::Organization, None, 1000, "USD").await.unwrap();
        mgr.create_budget("team-1", BudgetLevel::Team, Some("org-1".into()), 500, "USD").await.unwrap();
        mgr.consume("team-1", 100).await.unwrap();
        assert_eq!(mgr.get("team-1").await.unwrap().consumed, 100);
        assert_eq!(mgr.get("org-1").await.unwrap().consumed, 100);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn consume_fails_atomically_when_an_ancestor_is_exhausted() {
        let (mgr, dir) = manager().await;
        mgr.create_budget("org-1", BudgetLevel::Organization, None, 50, "USD").await.unwrap();
        mgr.create_budget("team-1", BudgetLevel::Team, Some("org-1".into()), 500, "USD").await.unwrap();
        let err = mgr.consume("team-1", 100).await.unwrap_err();
        assert!(matches!(err, OrkaError::BudgetExceeded { .. }));
        assert_eq!(mgr.get("team-1").await.unwrap().consumed, 0);
        assert_eq!(mgr.get("org-1").await.unwrap().consumed, 0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn warning_threshold_fires_exactly_once() {
        let (mgr, dir) = manager().await;
        mgr.create_budget("agent-1", BudgetLevel::Agent, None, 100, "USD").await.unwrap();
        mgr.consume("agent-1", 80).await.unwrap();
        let after_first = mgr.get("agent-1").await.unwrap();
        assert!(after_first.crossed_thresholds.contains(&75));
        mgr.consume("agent-1", 1).await.unwrap();
        let after_second = mgr.get("agent-1").await.unwrap();
        assert_eq!(
            after_second.crossed_thresholds.iter().filter(|t| **t == 75).count(),
            1
        );
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
