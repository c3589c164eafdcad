// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed-interval retry of transient failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default time budget for retrying transient errors.
pub const DEFAULT_TRANSIENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long, and how often, to retry an operation failing with transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Total time budget, measured from the first attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TRANSIENT_TIMEOUT,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, the policy's
/// budget is spent or `cancel` fires.
///
/// Each attempt is bounded by the same deadline. A budget overrun surfaces as
/// [`Error::RetryExhausted`] wrapping the last failure, or as [`Error::Timeout`]
/// when the first attempt itself never finished.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts: u32 = 0;
    let mut last_err: Option<Error> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout_at(deadline, f()) => result,
        };

        // An attempt still running at the deadline is abandoned.
        let Ok(result) = result else {
            warn!(operation, attempts, "Retry budget exhausted during an attempt");
            return Err(match last_err {
                Some(err) => Error::RetryExhausted {
                    attempts,
                    source: Box::new(err),
                },
                None => Error::Timeout(format!(
                    "{} did not finish within {:?}",
                    operation, policy.timeout
                )),
            });
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        if Instant::now() + policy.interval >= deadline {
            warn!(operation, attempts, error = %err, "Retry budget exhausted");
            return Err(Error::RetryExhausted {
                attempts,
                source: Box::new(err),
            });
        }

        debug!(operation, attempts, error = %err, "Transient failure, retrying");
        last_err = Some(err);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
