// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hook orchestration.
//!
//! `run_app_hook` drives one hook from start to finish:
//!
//! ```text
//! start_app_hook ──► ┌──────────────────────┐
//!                    │ wait_app_hook        │ ◄── caller token
//!                    │   (resumes on lost   │
//!                    │    connections)      │
//!                    └──────────┬───────────┘
//!                               │ failed: cancel child token
//!                    ┌──────────▼───────────┐
//!                    │ log task (child      │
//!                    │ token), drained      │
//!                    └──────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::{AppHooks, DeleteHookRequest, HookError, HookRef, HookRequest, Result};

/// How long a hook wait keeps resuming after lost connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Total number of wait attempts.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(5),
        }
    }
}

/// Run `wait` until it succeeds, resuming after connection failures.
///
/// Any other failure is returned as is. Once `policy.attempts` waits have
/// failed to connect, the last connection error is returned.
pub async fn wait_with_reconnect<F, Fut>(
    policy: &WaitPolicy,
    cancel: &CancellationToken,
    hook: &HookRef,
    mut wait: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HookError::Cancelled),
            result = wait() => match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            },
        };

        if !err.is_connection() {
            return Err(err);
        }
        if attempt >= policy.attempts.max(1) {
            warn!(job = %hook, attempts = attempt, error = %err, "Giving up waiting for hook");
            return Err(err);
        }

        warn!(job = %hook, attempt, error = %err, "Lost connection to the cluster, resuming wait");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HookError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

/// Start a hook, stream its logs to `out` and wait for it to finish.
///
/// Log streaming runs in its own task on a child of `cancel`. Streaming
/// errors are logged and never fail the hook. Once the job has finished the
/// stream is left to drain on its own; when the wait fails the stream is
/// cancelled. Either way the log task is joined before returning, so `out`
/// has received everything by then.
pub async fn run_app_hook<W>(
    hooks: Arc<dyn AppHooks>,
    req: &HookRequest,
    out: W,
    cancel: &CancellationToken,
) -> Result<HookRef>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let hook = hooks.start_app_hook(req).await?;
    info!(job = %hook, "Started hook");

    let logs_cancel = cancel.child_token();
    let logs = {
        let hooks = hooks.clone();
        let hook = hook.clone();
        let token = logs_cancel.clone();
        let mut out = out;
        tokio::spawn(async move {
            if let Err(e) = hooks.stream_app_hook_logs(&hook, &mut out, &token).await {
                match e {
                    HookError::Cancelled => debug!(job = %hook, "Log stream cancelled"),
                    e => error!(job = %hook, error = %e, "Failed to stream hook logs"),
                }
            }
            if let Err(e) = out.shutdown().await {
                warn!(job = %hook, error = %e, "Failed to flush hook logs");
            }
        })
    };

    let result = hooks.wait_app_hook(&hook, cancel).await;

    // A finished job still has log output in flight; only a failed wait
    // abandons the stream.
    if result.is_err() {
        logs_cancel.cancel();
    }
    if let Err(e) = logs.await {
        error!(job = %hook, error = %e, "Log task panicked");
    }

    match result {
        Ok(()) => {
            info!(job = %hook, "Hook completed");
            Ok(hook)
        }
        Err(e) => {
            warn!(job = %hook, error = %e, "Hook did not complete");
            Err(e)
        }
    }
}

/// Delete a hook job and its pods, treating an already missing job as deleted.
pub async fn cleanup_app_hook(hooks: &dyn AppHooks, hook: HookRef) -> Result<()> {
    let req = DeleteHookRequest {
        hook_ref: hook,
        cascade: true,
    };
    match hooks.delete_app_hook_job(&req).await {
        Err(e) if e.is_not_found() => {
            debug!(job = %req.hook_ref, "Hook job already gone");
            Ok(())
        }
        result => result,
    }
}
