pub mod autonomic;
pub mod rule;

pub use autonomic::Supervisor;
pub use rule::{ActionKind, ComparisonOp, EvaluationContext, Rule, TriggerKind};
