//! Rate-limit retry policy.
//!
//! A work item may absorb one rate limit: the limited gateway call is retried
//! once after the server-specified wait. The budget is shared by every call
//! the item makes, so a second rate limit anywhere in the same item is
//! returned to the caller and abandons the item. Other errors are never
//! retried.

use crate::errors::RcError;
use crate::observability::metrics;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// One rate-limit retry, shared by every gateway call of a work item.
#[derive(Debug, Default)]
pub struct RetryBudget {
    spent: AtomicBool,
}

impl RetryBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the retry available again. Called at the start of every item.
    pub fn reset(&self) {
        self.spent.store(false, Ordering::SeqCst);
    }

    /// Whether the retry has been used.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::SeqCst)
    }

    /// Take the retry. Returns `false` if it was already taken.
    fn take(&self) -> bool {
        !self.spent.swap(true, Ordering::SeqCst)
    }
}

/// Run `call`, retrying once if the gateway answers with a rate limit and
/// `budget` still has its retry.
///
/// # Errors
///
/// Returns the call's error if it is not a rate limit, or the rate limit
/// itself once `budget` is spent.
pub async fn with_rate_limit_retry<T, F, Fut>(
    operation: &'static str,
    budget: &RetryBudget,
    mut call: F,
) -> Result<T, RcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RcError>>,
{
    loop {
        match call().await {
            Err(RcError::RateLimited { retry_after }) => {
                metrics::record_rate_limited(operation);

                if !budget.take() {
                    error!(
                        target: "rc.engine.retry",
                        operation,
                        "Rate limited again within the same item, giving up"
                    );
                    return Err(RcError::RateLimited { retry_after });
                }

                warn!(
                    target: "rc.engine.retry",
                    operation,
                    delay_ms = retry_after.as_millis(),
                    "Rate limited, retrying after server-specified delay"
                );

                tokio::time::sleep(retry_after).await;
            }
            other => return other,
        }
    }
}
