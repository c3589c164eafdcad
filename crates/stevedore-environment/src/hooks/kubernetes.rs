// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes hook executor.
//!
//! Runs hooks as `batch/v1` Jobs through the cluster API. Job status is
//! polled; every poll also lists the job's pods and logs how they changed
//! since the previous poll.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use stevedore_core::AppService;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job::{job_name, render_job, resolve_hook};
use super::orchestrator::{WaitPolicy, wait_with_reconnect};
use super::traits::*;
use crate::pod_diff::diff_pods;

/// Hook executor backed by a Kubernetes cluster.
pub struct KubeHooks {
    client: Client,
    apps: Arc<dyn AppService>,
    namespace: String,
    wait_policy: WaitPolicy,
    poll_interval: Duration,
}

impl KubeHooks {
    /// Create an executor running jobs in `namespace` unless a request names another.
    pub fn new(client: Client, apps: Arc<dyn AppService>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            apps,
            namespace: namespace.into(),
            wait_policy: WaitPolicy::default(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Replace the reconnect policy used by `wait_app_hook`.
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Set how often job status is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pod_selector(hook: &HookRef) -> ListParams {
        ListParams::default().labels(&format!("job-name={}", hook.name))
    }

    async fn poll_job(&self, hook: &HookRef) -> Result<()> {
        let jobs = self.jobs(&hook.namespace);
        let pods = self.pods(&hook.namespace);
        let selector = Self::pod_selector(hook);
        let mut snapshot: Vec<Pod> = Vec::new();

        loop {
            let job = jobs
                .get_status(&hook.name)
                .await
                .map_err(|e| not_found(e, hook))?;

            let current = pods.list(&selector).await?.items;
            for line in diff_pods(&snapshot, &current) {
                info!(job = %hook, "{}", line);
            }
            snapshot = current;

            if let Some(outcome) = job_outcome(&job) {
                return outcome;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn job_finished(&self, hook: &HookRef) -> Result<bool> {
        let job = self
            .jobs(&hook.namespace)
            .get_status(&hook.name)
            .await
            .map_err(|e| not_found(e, hook))?;
        Ok(job_outcome(&job).is_some())
    }

    async fn follow_container(
        &self,
        pods: &Api<Pod>,
        pod: &str,
        container: &str,
        out: &mut LogWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..Default::default()
        };

        loop {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HookError::Cancelled),
                result = pods.log_stream(pod, &params) => result,
            };
            match stream {
                Ok(stream) => {
                    let mut reader = Box::pin(stream).compat();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(HookError::Cancelled),
                        copied = tokio::io::copy(&mut reader, &mut *out) => {
                            let bytes = copied?;
                            debug!(pod, container, bytes, "Log stream ended");
                            return Ok(());
                        }
                    }
                }
                // The container has not started yet.
                Err(kube::Error::Api(resp)) if resp.code == 400 => {
                    debug!(pod, container, reason = %resp.message, "Waiting for container logs");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(HookError::Cancelled),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Whether a job reached a terminal condition, and which.
pub fn job_outcome(job: &Job) -> Option<Result<()>> {
    let name = job.metadata.name.clone().unwrap_or_default();
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    for condition in conditions.iter().filter(|c| c.status == "True") {
        match condition.type_.as_str() {
            "Complete" => return Some(Ok(())),
            "Failed" => {
                let reason = condition
                    .reason
                    .clone()
                    .or_else(|| condition.message.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                return Some(Err(HookError::Failed { name, reason }));
            }
            _ => {}
        }
    }
    None
}

/// Names of the pod's init containers followed by its containers.
fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .iter()
        .flat_map(|s| s.init_containers.iter().flatten().chain(s.containers.iter()))
        .map(|c| c.name.clone())
        .collect()
}

fn not_found(err: kube::Error, hook: &HookRef) -> HookError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => HookError::NotFound(format!("job {}", hook)),
        e => e.into(),
    }
}

#[async_trait]
impl AppHooks for KubeHooks {
    async fn start_app_hook(&self, req: &HookRequest) -> Result<HookRef> {
        let hook = resolve_hook(self.apps.as_ref(), req).await?;
        let namespace = req.namespace.clone().unwrap_or_else(|| self.namespace.clone());
        let name = job_name(req);
        let job = render_job(&hook, req, &namespace, &name)?;

        self.jobs(&namespace)
            .create(&PostParams::default(), &job)
            .await?;

        info!(job = %name, namespace = %namespace, hook = %req.hook, app = %req.application, "Created hook job");
        Ok(HookRef {
            application: req.application.clone(),
            hook: req.hook,
            namespace,
            name,
        })
    }

    async fn wait_app_hook(&self, hook: &HookRef, cancel: &CancellationToken) -> Result<()> {
        wait_with_reconnect(&self.wait_policy, cancel, hook, || self.poll_job(hook)).await
    }

    async fn stream_app_hook_logs(
        &self,
        hook: &HookRef,
        out: &mut LogWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let pods = self.pods(&hook.namespace);
        let selector = Self::pod_selector(hook);
        let mut streamed: HashSet<String> = HashSet::new();

        loop {
            let list = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HookError::Cancelled),
                list = pods.list(&selector) => list?,
            };

            let pending: Vec<(String, Vec<String>)> = list
                .items
                .iter()
                .filter_map(|pod| {
                    let name = pod.metadata.name.clone()?;
                    (!streamed.contains(&name)).then(|| (name, container_names(pod)))
                })
                .collect();

            for (name, containers) in pending {
                for container in &containers {
                    self.follow_container(&pods, &name, container, out, cancel)
                        .await?;
                }
                streamed.insert(name);
            }

            if !streamed.is_empty() && self.job_finished(hook).await? {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HookError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn delete_app_hook_job(&self, req: &DeleteHookRequest) -> Result<()> {
        let hook = &req.hook_ref;
        let params = if req.cascade {
            DeleteParams::foreground()
        } else {
            DeleteParams::orphan()
        };
        self.jobs(&hook.namespace)
            .delete(&hook.name, &params)
            .await
            .map_err(|e| not_found(e, hook))?;
        info!(job = %hook, cascade = req.cascade, "Deleted hook job");
        Ok(())
    }
}
