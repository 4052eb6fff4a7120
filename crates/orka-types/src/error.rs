use thiserror::Error;

/// Canonical error kinds surfaced by every core component. Adapters (out of
/// scope here) map these to transport-specific status classes; the core only
/// ever produces one of these variants, never a bare string.
#[derive(Debug, Error)]
pub enum OrkaError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid transition for {entity} {id}: {from} -> {event} is not allowed")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        event: String,
    },

    #[error("optimistic lock conflict on {table} {id}: expected version {expected}, found {actual}")]
    OptimisticLockConflict {
        table: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("budget exceeded at {level}: {consumed}/{total}")]
    BudgetExceeded {
        level: String,
        consumed: i64,
        total: i64,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("circuit open for cluster {cluster_id}")]
    CircuitOpen { cluster_id: String },

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("internal error: {0}")]
    FatalInternal(#[from] anyhow::Error),
}

impl OrkaError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OrkaError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        OrkaError::InvalidTransition {
            entity,
            id: id.into(),
            from: from.into(),
            event: event.into(),
        }
    }

    /// Whether TransactionManager-style callers should retry this error
    /// automatically, per the recovery column of the error-kind table.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OrkaError::OptimisticLockConflict { .. }
                | OrkaError::Timeout(_)
                | OrkaError::TransientStore(_)
        )
    }
}

pub type OrkaResult<T> = std::result::Result<T, OrkaError>;
