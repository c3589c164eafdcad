// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress reporting for long-running operations.
//!
//! An operation is spawned as a task through [`OperationHandle::spawn`]. The
//! task reports [`ProgressEntry`] values through a [`ProgressReporter`]; the
//! caller observes them through a `watch` channel and collects the single
//! terminal result with [`OperationHandle::wait`].
//!
//! The channel starts out holding `None`: an operation may finish without ever
//! reporting progress, in which case the result is the only signal.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Overall state of an operation at the time of a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Work is ongoing.
    InProgress,
    /// The operation finished successfully.
    Completed,
    /// The operation failed.
    Failed,
}

/// One step of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Operation state.
    pub state: ProgressState,
    /// Percent complete, `0..=100`.
    pub completion: u8,
    /// Human-readable description of the step.
    pub message: String,
    /// When the entry was produced.
    pub created: DateTime<Utc>,
}

impl ProgressEntry {
    /// Whether this is the last entry of the operation.
    pub fn is_terminal(&self) -> bool {
        self.completion == 100
    }
}

/// Producer side of a progress channel.
///
/// A reporter maps the `0..=100` it is given onto its slice of the overall
/// operation, which is all of it unless narrowed with [`ProgressReporter::within`].
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Option<ProgressEntry>>>,
    start: u8,
    end: u8,
}

impl ProgressReporter {
    /// Create a reporter and a receiver observing it.
    pub fn channel() -> (Self, watch::Receiver<Option<ProgressEntry>>) {
        let (tx, rx) = watch::channel(None);
        let reporter = Self {
            tx: Arc::new(tx),
            start: 0,
            end: 100,
        };
        (reporter, rx)
    }

    /// A reporter on the same channel whose `0..=100` covers `start..=end`
    /// of this reporter's range.
    pub fn within(&self, start: u8, end: u8) -> Self {
        let start = start.min(100);
        let end = end.clamp(start, 100);
        Self {
            tx: self.tx.clone(),
            start: self.scale(start),
            end: self.scale(end),
        }
    }

    fn scale(&self, completion: u8) -> u8 {
        let span = u16::from(self.end - self.start);
        let offset = span * u16::from(completion.min(100)) / 100;
        self.start + offset as u8
    }

    /// Report an intermediate step. `completion` is capped below 100.
    pub fn report(&self, completion: u8, message: impl Into<String>) {
        let completion = self.scale(completion).min(99);
        self.publish(ProgressState::InProgress, completion, message.into());
    }

    /// Report successful completion.
    pub fn complete(&self, message: impl Into<String>) {
        self.publish(ProgressState::Completed, 100, message.into());
    }

    /// Report failure.
    pub fn fail(&self, message: impl Into<String>) {
        self.publish(ProgressState::Failed, 100, message.into());
    }

    /// The most recent entry.
    pub fn latest(&self) -> Option<ProgressEntry> {
        self.tx.borrow().clone()
    }

    fn publish(&self, state: ProgressState, completion: u8, message: String) {
        debug!(?state, completion, message = %message, "Progress");
        self.tx.send_replace(Some(ProgressEntry {
            state,
            completion,
            message,
            created: Utc::now(),
        }));
    }
}

/// Handle to a spawned operation producing a `T`.
pub struct OperationHandle<T> {
    progress: watch::Receiver<Option<ProgressEntry>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Spawn `f` with a fresh reporter and a child of `cancel`.
    ///
    /// When `f` returns, a terminal entry is published unless `f` already did.
    pub fn spawn<F, Fut>(cancel: &CancellationToken, f: F) -> Self
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reporter, progress) = ProgressReporter::channel();
        let cancel = cancel.child_token();
        let fut = f(reporter.clone(), cancel.clone());

        let task = tokio::spawn(async move {
            let result = fut.await;
            let finished = reporter.latest().is_some_and(|e| e.is_terminal());
            if !finished {
                match &result {
                    Ok(_) => reporter.complete("Operation completed"),
                    Err(e) => reporter.fail(e.to_string()),
                }
            }
            result
        });

        Self {
            progress,
            cancel,
            task,
        }
    }

    /// A new receiver of progress entries.
    pub fn subscribe(&self) -> watch::Receiver<Option<ProgressEntry>> {
        self.progress.clone()
    }

    /// The latest progress entry, `None` if nothing was reported yet.
    pub fn latest(&self) -> Option<ProgressEntry> {
        self.progress.borrow().clone()
    }

    /// Request cancellation of the operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the operation's result.
    pub async fn wait(self) -> Result<T> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Other(format!("operation task panicked: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_and_result() {
        let handle = OperationHandle::spawn(&CancellationToken::new(), |progress, _| async move {
            progress.report(50, "halfway");
            Ok(7)
        });
        let mut rx = handle.subscribe();

        assert_eq!(handle.wait().await.unwrap(), 7);

        rx.changed().await.ok();
        let last = rx.borrow().clone().unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.state, ProgressState::Completed);
    }

    #[tokio::test]
    async fn test_silent_failure_publishes_terminal_entry() {
        let handle: OperationHandle<()> =
            OperationHandle::spawn(&CancellationToken::new(), |_, _| async move {
                Err(Error::BadParameter("nope".into()))
            });
        let rx = handle.subscribe();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_bad_parameter());

        let last = rx.borrow().clone().unwrap();
        assert_eq!(last.state, ProgressState::Failed);
        assert!(last.message.contains("nope"));
    }

    #[tokio::test]
    async fn test_no_progress_before_start() {
        let (reporter, rx) = ProgressReporter::channel();
        assert!(rx.borrow().is_none());
        assert!(reporter.latest().is_none());

        reporter.report(120, "capped");
        assert_eq!(reporter.latest().unwrap().completion, 99);
    }

    #[tokio::test]
    async fn test_narrowed_reporter_stays_in_its_range() {
        let (reporter, _rx) = ProgressReporter::channel();
        let registry = reporter.within(70, 100);

        registry.report(0, "start");
        assert_eq!(reporter.latest().unwrap().completion, 70);
        registry.report(50, "half");
        assert_eq!(reporter.latest().unwrap().completion, 85);
        registry.report(100, "done");
        assert_eq!(reporter.latest().unwrap().completion, 99);

        // Narrowing composes with the parent's range.
        let second_half = registry.within(50, 100);
        second_half.report(0, "nested");
        assert_eq!(reporter.latest().unwrap().completion, 85);
    }

    #[tokio::test]
    async fn test_cancel_reaches_operation() {
        let handle: OperationHandle<()> =
            OperationHandle::spawn(&CancellationToken::new(), |_, cancel| async move {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            });
        handle.cancel();
        assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
    }
}
