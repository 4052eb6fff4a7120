use std::future::Future;
use std::time::Duration;

use orka_types::{OrkaError, OrkaResult};
use rand::Rng;

use crate::config::{IsolationLevel, TransactionConfig};

/// Wraps durable-store operations with retry.
/// `Collection::update_with_optimistic_lock` / `atomic_increment` /
/// `compare_and_swap` already provide the atomic primitives;
/// `TransactionManager` adds a retry-on-conflict envelope around any
/// sequence of those calls.
#[derive(Clone)]
pub struct TransactionManager {
    config: TransactionConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl TransactionManager {
    pub fn new(config: TransactionConfig) -> Self {
        TransactionManager { config }
    }

    pub fn default_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.config.default_isolation,
            timeout: Duration::from_secs(30),
            max_retries: self.config.max_retries,
        }
    }

    /// Runs `op` with exponential-backoff retry on retriable errors
    /// (`OptimisticLockConflict`, `Timeout`, `TransientStore`). Non-retriable
    /// errors (validation, invalid transition, not-found) fail immediately.
    pub async fn with_transaction<T, F, Fut>(&self, opts: TransactionOptions, mut op: F) -> OrkaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrkaResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::time::timeout(opts.timeout, op())
                .await
                .map_err(|_| OrkaError::Timeout(opts.timeout))
                .and_then(|inner| inner);

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < opts.max_retries => {
                    attempt += 1;
                    let backoff = backoff_delay(attempt);
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Nested scope: on failure inside `op`, only `op`'s own effects are
    /// undone (the caller is expected to have made `op` itself atomic via a
    /// single `Collection` call; there is no partial in-memory state to roll
    /// back otherwise).
    pub async fn with_savepoint<T, Fut>(&self, op: Fut) -> OrkaResult<T>
    where
        Fut: Future<Output = OrkaResult<T>>,
    {
        op.await
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms: u64 = 50;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
    Duration::from_millis((exp + jitter_ms).min(5_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_until_success_on_retriable_error() {
        let mgr = TransactionManager::new(TransactionConfig {
            default_isolation: IsolationLevel::ReadCommitted,
            max_retries: 3,
        });
        let attempts = Arc::new(AtomicU32::new(0));
        let opts = mgr.default_options();
        let result = mgr
            .with_transaction(opts, || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(OrkaError::TransientStore("not yet".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_never_retry() {
        let mgr = TransactionManager::new(TransactionConfig {
            default_isolation: IsolationLevel::ReadCommitted,
            max_retries: 3,
        });
        let attempts = Arc::new(AtomicU32::new(0));
        let opts = mgr.default_options();
        let err = mgr
            .with_transaction::<(), _, _>(opts, || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(OrkaError::Validation("bad input".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrkaError::Validation(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
