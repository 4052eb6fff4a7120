use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Agent,
    Team,
    Project,
    Organization,
}

impl BudgetLevel {
    pub fn parent(self) -> Option<BudgetLevel> {
        match self {
            BudgetLevel::Agent => Some(BudgetLevel::Team),
            BudgetLevel::Team => Some(BudgetLevel::Project),
            BudgetLevel::Project => Some(BudgetLevel::Organization),
            BudgetLevel::Organization => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub entity_id: String,
    pub level: BudgetLevel,
    pub parent_entity_id: Option<String>,
    pub total: i64,
    pub consumed: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: Option<DateTime<Utc>>,
    pub currency: String,
    /// Which alert thresholds have already fired this period, so crossings
    /// are reported exactly once.
    pub crossed_thresholds: Vec<u8>,
    pub version: u64,
}

impl Budget {
    pub fn remaining(&self) -> i64 {
        (self.total - self.consumed).max(0)
    }

    pub fn utilization(&self) -> f64 {
        if self.total <= 0 {
            return 0.0;
        }
        self.consumed as f64 / self.total as f64
    }
}
