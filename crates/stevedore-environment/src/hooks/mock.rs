// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock hook executor for testing.
//!
//! Renders jobs exactly like the Kubernetes executor but keeps them in
//! memory and simulates their completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use stevedore_core::AppService;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::job::{job_name, render_job, resolve_hook};
use super::orchestrator::{WaitPolicy, wait_with_reconnect};
use super::traits::*;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum MockStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Mock job state.
#[derive(Debug, Clone)]
struct MockJob {
    job: Job,
    status: MockStatus,
}

/// Mock hook executor for testing.
pub struct MockHooks {
    apps: Arc<dyn AppService>,
    jobs: Arc<Mutex<HashMap<String, MockJob>>>,
    deletions: Mutex<Vec<(String, bool)>>,
    wait_failures: AtomicU32,
    wait_policy: WaitPolicy,
    /// Namespace used when the request does not name one.
    pub namespace: String,
    /// Output written by every job's log stream.
    pub logs: Vec<u8>,
    /// Delay before a job completes on its own (in milliseconds).
    pub execution_delay_ms: u64,
    /// If true, jobs fail instead of succeeding.
    pub fail_by_default: bool,
    /// If true, jobs keep running until completed or failed explicitly.
    pub never_complete: bool,
}

impl MockHooks {
    /// Create a mock executor whose jobs succeed shortly after starting.
    pub fn new(apps: Arc<dyn AppService>) -> Self {
        Self {
            apps,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            deletions: Mutex::new(Vec::new()),
            wait_failures: AtomicU32::new(0),
            wait_policy: WaitPolicy {
                attempts: 60,
                interval: Duration::from_millis(10),
            },
            namespace: "kube-system".to_string(),
            logs: b"hook started\nhook finished\n".to_vec(),
            execution_delay_ms: 10,
            fail_by_default: false,
            never_complete: false,
        }
    }

    /// Create a mock executor whose jobs fail.
    pub fn failing(apps: Arc<dyn AppService>) -> Self {
        Self {
            fail_by_default: true,
            ..Self::new(apps)
        }
    }

    /// Create a mock executor whose jobs run until finished explicitly via
    /// [`complete_job`](Self::complete_job) or [`fail_job`](Self::fail_job).
    pub fn never_completing(apps: Arc<dyn AppService>) -> Self {
        Self {
            execution_delay_ms: 0,
            never_complete: true,
            ..Self::new(apps)
        }
    }

    /// Replace the reconnect policy used by `wait_app_hook`.
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Fail the next `count` job status reads with a connection error.
    pub fn inject_wait_failures(&self, count: u32) {
        self.wait_failures.store(count, Ordering::SeqCst);
    }

    /// Mark a job as succeeded.
    pub async fn complete_job(&self, name: &str) {
        self.set_status(name, MockStatus::Succeeded).await;
    }

    /// Mark a job as failed.
    pub async fn fail_job(&self, name: &str, reason: &str) {
        self.set_status(name, MockStatus::Failed(reason.to_string()))
            .await;
    }

    /// Number of jobs that exist.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// The rendered job, if it exists.
    pub async fn job(&self, name: &str) -> Option<Job> {
        self.jobs.lock().await.get(name).map(|j| j.job.clone())
    }

    /// Deleted jobs with the cascade flag they were deleted with.
    pub async fn deletions(&self) -> Vec<(String, bool)> {
        self.deletions.lock().await.clone()
    }

    async fn set_status(&self, name: &str, status: MockStatus) {
        if let Some(job) = self.jobs.lock().await.get_mut(name) {
            job.status = status;
        }
    }

    async fn status(&self, hook: &HookRef) -> Result<MockStatus> {
        self.jobs
            .lock()
            .await
            .get(&hook.name)
            .map(|j| j.status.clone())
            .ok_or_else(|| HookError::NotFound(format!("job {}", hook)))
    }

    async fn poll_until_done(&self, hook: &HookRef) -> Result<()> {
        loop {
            let consumed = self
                .wait_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(HookError::Connection(format!(
                    "lost watch on job {}",
                    hook.name
                )));
            }

            match self.status(hook).await? {
                MockStatus::Running => tokio::time::sleep(POLL_INTERVAL).await,
                MockStatus::Succeeded => return Ok(()),
                MockStatus::Failed(reason) => {
                    return Err(HookError::Failed {
                        name: hook.name.clone(),
                        reason,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl AppHooks for MockHooks {
    async fn start_app_hook(&self, req: &HookRequest) -> Result<HookRef> {
        let hook = resolve_hook(self.apps.as_ref(), req).await?;
        let namespace = req.namespace.clone().unwrap_or_else(|| self.namespace.clone());
        let name = job_name(req);
        let job = render_job(&hook, req, &namespace, &name)?;

        {
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(&name) {
                return Err(HookError::BadParameter(format!(
                    "job {}/{} already exists",
                    namespace, name
                )));
            }
            jobs.insert(
                name.clone(),
                MockJob {
                    job,
                    status: MockStatus::Running,
                },
            );
        }

        // Simulate async completion (unless never_complete is set)
        if !self.never_complete {
            let jobs = self.jobs.clone();
            let job_name = name.clone();
            let fail = self.fail_by_default;
            let delay = self.execution_delay_ms;
            tokio::spawn(async move {
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                if let Some(job) = jobs.lock().await.get_mut(&job_name)
                    && job.status == MockStatus::Running
                {
                    job.status = if fail {
                        MockStatus::Failed("BackoffLimitExceeded".to_string())
                    } else {
                        MockStatus::Succeeded
                    };
                }
            });
        }

        debug!(job = %name, namespace = %namespace, "Started mock hook job");
        Ok(HookRef {
            application: req.application.clone(),
            hook: req.hook,
            namespace,
            name,
        })
    }

    async fn wait_app_hook(&self, hook: &HookRef, cancel: &CancellationToken) -> Result<()> {
        wait_with_reconnect(&self.wait_policy, cancel, hook, || self.poll_until_done(hook)).await
    }

    async fn stream_app_hook_logs(
        &self,
        hook: &HookRef,
        out: &mut LogWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.status(hook).await?;
        out.write_all(&self.logs).await?;
        out.flush().await?;

        // Follow until the job terminates, like a real pod log stream.
        loop {
            if self.status(hook).await? != MockStatus::Running {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HookError::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn delete_app_hook_job(&self, req: &DeleteHookRequest) -> Result<()> {
        let removed = self.jobs.lock().await.remove(&req.hook_ref.name);
        if removed.is_none() {
            return Err(HookError::NotFound(format!("job {}", req.hook_ref)));
        }
        self.deletions
            .lock()
            .await
            .push((req.hook_ref.name.clone(), req.cascade));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stevedore_core::HookType;
    use stevedore_core::manifest::{Hook, Manifest};
    use stevedore_core::memory::MemoryBackend;
    use stevedore_core::package::Labels;

    async fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        let mut manifest = Manifest::new(&"example.com/app:1.0.0".parse().unwrap());
        manifest.hooks.insert(
            HookType::Install,
            Hook {
                job: json!({"spec": {"template": {"spec": {"containers": [{"name": "c", "image": "busybox"}]}}}}),
            },
        );
        backend
            .insert_app(&manifest, b"bundle".to_vec(), Labels::new())
            .await
            .unwrap();
        backend
    }

    fn request(hook: HookType) -> HookRequest {
        HookRequest::new("example.com/app:1.0.0".parse().unwrap(), hook)
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let hooks = MockHooks::new(backend().await);
        let hook = hooks.start_app_hook(&request(HookType::Install)).await.unwrap();
        assert_eq!(hook.namespace, "kube-system");
        hooks.wait_app_hook(&hook, &CancellationToken::new()).await.unwrap();
        assert!(hooks.job(&hook.name).await.is_some());
    }

    #[tokio::test]
    async fn test_failing_job_reports_failure() {
        let hooks = MockHooks::failing(backend().await);
        let hook = hooks.start_app_hook(&request(HookType::Install)).await.unwrap();
        let err = hooks
            .wait_app_hook(&hook, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Failed { ref reason, .. } if reason == "BackoffLimitExceeded"));
    }

    #[tokio::test]
    async fn test_undeclared_hook_is_rejected() {
        let hooks = MockHooks::new(backend().await);
        let err = hooks
            .start_app_hook(&request(HookType::Uninstall))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::BadParameter(_)));
        assert_eq!(hooks.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let hooks = MockHooks::never_completing(backend().await);
        let hook = hooks.start_app_hook(&request(HookType::Install)).await.unwrap();
        let req = DeleteHookRequest {
            hook_ref: hook.clone(),
            cascade: true,
        };
        hooks.delete_app_hook_job(&req).await.unwrap();
        let err = hooks.delete_app_hook_job(&req).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(hooks.deletions().await, vec![(hook.name, true)]);
    }
}
