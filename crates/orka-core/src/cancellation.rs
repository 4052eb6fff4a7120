use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Registry of per-operation cancellation tokens; every long-running
/// operation accepts one. Cooperative: holders poll `is_cancelled()` at
/// their own suspension points.
#[derive(Clone)]
pub struct CancellationRegistry {
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        CancellationRegistry {
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn issue(&self, operation_id: impl Into<String>) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(operation_id.into(), token.clone());
        token
    }

    pub async fn cancel(&self, operation_id: &str) -> bool {
        if let Some(token) = self.tokens.read().await.get(operation_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn retire(&self, operation_id: &str) {
        self.tokens.write().await.remove(operation_id);
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Kill escalation: signal cooperatively, then race the operation's own
/// completion against `graceful_kill_timeout`. `completed`
/// is whatever future resolves when the operation has actually wound down
/// (e.g. its task join handle); if it hasn't by the deadline, the caller
/// should proceed straight to a hard kill.
pub async fn escalate_kill<F>(
    token: &CancellationToken,
    completed: F,
    graceful_kill_timeout: Duration,
) -> KillOutcome
where
    F: std::future::Future<Output = ()>,
{
    token.cancel();
    tokio::select! {
        _ = completed => KillOutcome::Cooperative,
        _ = tokio::time::sleep(graceful_kill_timeout) => KillOutcome::Forced,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Cooperative,
    Forced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_unblocks_issued_token() {
        let registry = CancellationRegistry::new();
        let token = registry.issue("op-1").await;
        assert!(!token.is_cancelled());
        assert!(registry.cancel("op-1").await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_on_unknown_operation_is_false() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test]
    async fn escalate_kill_forces_after_timeout_if_uncooperative() {
        let token = CancellationToken::new();
        let never = std::future::pending::<()>();
        let outcome = escalate_kill(&token, never, Duration::from_millis(20)).await;
        assert_eq!(outcome, KillOutcome::Forced);
    }

    #[tokio::test]
    async fn escalate_kill_is_cooperative_when_operation_exits_promptly() {
        let token = CancellationToken::new();
        let finished = async { tokio::time::sleep(Duration::from_millis(1)).await };
        let outcome = escalate_kill(&token, finished, Duration::from_millis(200)).await;
        assert_eq!(outcome, KillOutcome::Cooperative);
    }
}
