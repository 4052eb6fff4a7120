use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl ComparisonOp {
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            ComparisonOp::GreaterThan => lhs > rhs,
            ComparisonOp::GreaterOrEqual => lhs >= rhs,
            ComparisonOp::LessThan => lhs < rhs,
            ComparisonOp::LessOrEqual => lhs <= rhs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    Threshold {
        metric: String,
        operator: ComparisonOp,
        value: f64,
    },
    AlertId {
        alert_id: String,
    },
    Cron {
        expression: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp { team_id: String, by: u32 },
    ScaleDown { team_id: String, by: u32 },
    Restart { agent_id: String },
    Rebalance { team_id: String },
    Notify { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    pub trigger: TriggerKind,
    pub action: ActionKind,
    pub cooldown_ms: u64,
}

/// Point-in-time inputs a tick evaluates rules against: current metric
/// values and the set of currently-active alert ids. Supplied by the
/// caller each tick rather than owned by the supervisor, since the
/// metrics/alerting source is out of this crate's scope.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub metrics: HashMap<String, f64>,
    pub active_alerts: HashSet<String>,
}

impl Rule {
    /// Whether this rule's trigger condition holds right now. Cron
    /// triggers additionally need the time window since the rule was last
    /// checked, to avoid missing a fire between ticks.
    pub fn triggered(&self, ctx: &EvaluationContext, since_last_check: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match &self.trigger {
            TriggerKind::Threshold { metric, operator, value } => ctx
                .metrics
                .get(metric)
                .map(|observed| operator.holds(*observed, *value))
                .unwrap_or(false),
            TriggerKind::AlertId { alert_id } => ctx.active_alerts.contains(alert_id),
            TriggerKind::Cron { expression } => match cron::Schedule::from_str(expression) {
                Ok(schedule) => schedule.after(&since_last_check).take_while(|t| *t <= now).next().is_some(),
                Err(_) => false,
            },
        }
    }
}
