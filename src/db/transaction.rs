

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Store, Transaction};
use crate::core::config::CascadeConfig;
use crate::core::error::{CascadeError, Result};


const MAX_RETRY_DELAY_MS: u64 = 2_000;


#[derive(Debug, Clone)]
pub struct TransactionPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl TransactionPolicy {
    pub fn from_config(config: &CascadeConfig) -> Self {
        Self {
            max_attempts: config.transaction_max_attempts.max(1),
            timeout: config.transaction_timeout(),
            retry_delay: Duration::from_millis(config.transaction_retry_delay_ms),
        }
    }
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self::from_config(&CascadeConfig::default())
    }
}


/// Runs `op` inside a fresh transaction and commits it. Transient failures
/// (commit conflicts) rerun the whole closure with backoff; each attempt is
/// bounded by the policy timeout.
pub async fn run_with_transaction<T, F>(
    store: &dyn Store,
    policy: &TransactionPolicy,
    mut op: F,
) -> Result<T>
where
    T: Send,
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut delay = policy.retry_delay;

    for attempt in 1..=policy.max_attempts {
        debug!("Transaction on {} (attempt {})", store.name(), attempt);

        let attempt_result = tokio::time::timeout(policy.timeout, async {
            let mut tx = store.begin().await?;
            let value = op(tx.as_mut()).await?;
            tx.commit().await?;
            Ok::<_, CascadeError>(value)
        })
        .await;

        match attempt_result {
            Err(_) => {
                warn!(
                    "Transaction on {} timed out after {:?}",
                    store.name(),
                    policy.timeout
                );
                return Err(CascadeError::Timeout(policy.timeout.as_millis() as u64));
            }
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_transient() && attempt < policy.max_attempts => {
                debug!(
                    "Transaction on {} failed (attempt {}), retrying: {}",
                    store.name(),
                    attempt,
                    e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(MAX_RETRY_DELAY_MS));
            }
            Ok(Err(e)) => return Err(e),
        }
    }

    Err(CascadeError::Conflict(format!(
        "retries exhausted after {} attempts",
        policy.max_attempts
    )))
}
