//! Bounded retry for confirming asynchronous provider operations.
//!
//! Provider plugins confirm that an instance termination or capacity
//! change has converged by polling a predicate over a provider read. The
//! polling mechanics live here; only the predicate varies per call site.

use std::future::Future;

use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::error::RetryError;
use crate::types::RetryPolicy;

/// Call `check` until it reports done, at most `policy.max_attempts` times.
///
/// `check` is called immediately. `Ok(true)` returns success at once;
/// `Ok(false)` or `Err(_)` sleeps `policy.interval` and retries. When the
/// attempts run out, the last error (if any) is returned with the attempt
/// count. Cancellation is observed while sleeping. A `max_attempts` of 0
/// still calls `check` once.
pub async fn poll<F, Fut, E>(
    cancel: &Cancellation,
    policy: RetryPolicy,
    mut check: F,
) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut cancel = cancel.clone();
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match check().await {
            Ok(true) => {
                debug!(attempt, "condition met");
                return Ok(());
            }
            Ok(false) => {
                debug!(attempt, max_attempts, "condition not yet met");
                last_err = None;
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "condition check failed");
                last_err = Some(e);
            }
        }

        if attempt == max_attempts {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }
    }

    Err(match last_err {
        Some(error) => RetryError::Exhausted {
            attempts: max_attempts,
            error,
        },
        None => RetryError::NotConverged {
            attempts: max_attempts,
        },
    })
}
