use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use orka_core::event_bus::EventBus;
use orka_types::NewEvent;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::rule::{ActionKind, EvaluationContext, Rule};

/// Periodic rule evaluator. Owns no execution logic itself: a fired rule
/// is published as a `supervisor.action.triggered` event and the caller
/// (the component that actually knows how to scale a team or restart an
/// agent) reacts to it.
#[derive(Clone)]
pub struct Supervisor {
    rules: Arc<RwLock<Vec<Rule>>>,
    cooldowns: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    last_checked: Arc<Mutex<DateTime<Utc>>>,
    events: EventBus,
}

impl Supervisor {
    pub fn new(events: EventBus) -> Self {
        Supervisor {
            rules: Arc::new(RwLock::new(Vec::new())),
            cooldowns: Arc::new(Mutex::new(HashMap::new())),
            last_checked: Arc::new(Mutex::new(Utc::now())),
            events,
        }
    }

    pub async fn add_rule(&self, rule: Rule) {
        self.rules.write().await.push(rule);
    }

    pub async fn remove_rule(&self, rule_id: &str) {
        self.rules.write().await.retain(|r| r.id != rule_id);
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    /// Evaluates every rule once against `ctx`, in priority order (higher
    /// `priority` first, rule id as the deterministic tie-break), skipping
    /// any rule still inside its cooldown window. Returns the rules that
    /// fired this tick, each already published as an event.
    pub async fn tick(&self, ctx: EvaluationContext) -> Vec<Rule> {
        let now = Utc::now();
        let since_last_check = {
            let mut last = self.last_checked.lock().await;
            let previous = *last;
            *last = now;
            previous
        };

        let mut ordered = self.rules.read().await.clone();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut fired = Vec::new();
        for rule in ordered {
            if !rule.triggered(&ctx, since_last_check, now) {
                continue;
            }
            {
                let mut cooldowns = self.cooldowns.lock().await;
                if let Some(muted_until) = cooldowns.get(&rule.id) {
                    if *muted_until > now {
                        continue;
                    }
                }
                cooldowns.insert(rule.id.clone(), now + chrono::Duration::milliseconds(rule.cooldown_ms as i64));
            }

            let _ = self
                .events
                .publish(
                    NewEvent::new("supervisor.action.triggered", "supervisor")
                        .with_payload(serde_json::json!({
                            "rule_id": rule.id,
                            "action": action_payload(&rule.action),
                        })),
                )
                .await;
            fired.push(rule);
        }
        fired
    }

    /// Spawns a background task that ticks every `tick_ms`, pulling fresh
    /// evaluation inputs from `ctx_source` each time. Dropping the returned
    /// handle does not stop the loop; abort it explicitly to stop.
    pub fn spawn(&self, tick_ms: u64, ctx_source: Arc<dyn Fn() -> EvaluationContext + Send + Sync>) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                let ctx = ctx_source();
                supervisor.tick(ctx).await;
            }
        })
    }
}

fn action_payload(action: &ActionKind) -> serde_json::Value {
    serde_json::to_value(action).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{ComparisonOp, TriggerKind};
    use std::collections::HashSet;

    async fn supervisor() -> (Supervisor, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("orka-supervisor-{}", uuid::Uuid::new_v4()));
        let events = EventBus::open(&dir, Default::default()).await.unwrap();
        (Supervisor::new(events), dir)
    }

    #[tokio::test]
    async fn threshold_rule_fires_when_metric_crosses() {
        let (supervisor, dir) = supervisor().await;
        supervisor
            .add_rule(Rule {
                id: "scale-up-on-load".into(),
                priority: 10,
                trigger: TriggerKind::Threshold {
                    metric: "team.load".into(),
                    operator: ComparisonOp::GreaterThan,
                    value: 0.8,
                },
                action: ActionKind::ScaleUp {
                    team_id: "team-1".into(),
                    by: 2,
                },
                cooldown_ms: 60_000,
            })
            .await;

        let mut metrics = HashMap::new();
        metrics.insert("team.load".to_string(), 0.9);
        let ctx = EvaluationContext {
            metrics,
            active_alerts: HashSet::new(),
        };
        let fired = supervisor.tick(ctx).await;
        assert_eq!(fired.len(), 1);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn rule_is_muted_during_its_cooldown() {
        let (supervisor, dir) = supervisor().await;
        supervisor
            .add_rule(Rule {
                id: "notify-always".into(),
                priority: 0,
                trigger: TriggerKind::AlertId {
                    alert_id: "disk-full".into(),
                },
                action: ActionKind::Notify {
                    message: "disk full".into(),
                },
                cooldown_ms: 3_600_000,
            })
            .await;

        let mut alerts = HashSet::new();
        alerts.insert("disk-full".to_string());
        let ctx = EvaluationContext {
            metrics: HashMap::new(),
            active_alerts: alerts,
        };
        let first = supervisor.tick(ctx.clone()).await;
        let second = supervisor.tick(ctx).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn higher_priority_rule_evaluates_before_lower() {
        let (supervisor, dir) = supervisor().await;
        supervisor
            .add_rule(Rule {
                id: "low".into(),
                priority: 1,
                trigger: TriggerKind::AlertId { alert_id: "x".into() },
                action: ActionKind::Notify { message: "low".into() },
                cooldown_ms: 0,
            })
            .await;
        supervisor
            .add_rule(Rule {
                id: "high".into(),
                priority: 100,
                trigger: TriggerKind::AlertId { alert_id: "x".into() },
                action: ActionKind::Notify { message: "high".into() },
                cooldown_ms: 0,
            })
            .await;

        let mut alerts = HashSet::new();
        alerts.insert("x".to_string());
        let ctx = EvaluationContext {
            metrics: HashMap::new(),
            active_alerts: alerts,
        };
        let fired = supervisor.tick(ctx).await;
        assert_eq!(fired[0].id, "high");
        assert_eq!(fired[1].id, "low");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
