// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hook trait definitions.
//!
//! Defines the abstract interface for running application lifecycle hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use serde::{Deserialize, Serialize};
use stevedore_core::{HookType, Locator};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Errors from hook operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HookError {
    /// The application or hook job does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is malformed or names a hook the application does not declare.
    #[error("Invalid hook request: {0}")]
    BadParameter(String),

    /// The cluster could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Kubernetes API call failed.
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The hook job finished unsuccessfully.
    #[error("Hook job {name} failed: {reason}")]
    Failed {
        /// Job name.
        name: String,
        /// Reason reported by the job controller.
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("Hook operation cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Package or application service failed.
    #[error("Package service error: {0}")]
    Core(#[from] stevedore_core::Error),
}

impl HookError {
    /// Whether the failure is a lost or refused connection, worth resuming.
    pub fn is_connection(&self) -> bool {
        match self {
            HookError::Connection(_) => true,
            HookError::Kube(e) => match e {
                kube::Error::HyperError(_) | kube::Error::Service(_) => true,
                kube::Error::Api(resp) => matches!(resp.code, 502..=504),
                _ => false,
            },
            HookError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            HookError::Core(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the failure reports a missing application or job.
    pub fn is_not_found(&self) -> bool {
        match self {
            HookError::NotFound(_) => true,
            HookError::Kube(kube::Error::Api(resp)) => resp.code == 404,
            HookError::Core(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for hook operations.
pub type Result<T> = std::result::Result<T, HookError>;

/// Identity a hook job runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUser {
    /// User name, informational.
    pub name: String,
    /// Numeric user ID applied as `runAsUser`.
    pub uid: i64,
}

/// Parameters for starting a hook.
#[derive(Debug, Clone)]
pub struct HookRequest {
    /// Application whose manifest declares the hook.
    pub application: Locator,
    /// Which hook to run.
    pub hook: HookType,
    /// Extra volumes added to the pod.
    pub volumes: Vec<Volume>,
    /// Extra mounts added to every container.
    pub volume_mounts: Vec<VolumeMount>,
    /// Node selector merged into the pod spec.
    pub node_selector: BTreeMap<String, String>,
    /// Environment variables added to every container.
    pub env: Vec<EnvVar>,
    /// Job deadline, applied as `activeDeadlineSeconds`.
    pub timeout: Option<Duration>,
    /// User the containers run as.
    pub service_user: Option<ServiceUser>,
    /// Service account the pod runs under.
    pub service_account: Option<String>,
    /// Namespace override.
    pub namespace: Option<String>,
    /// Job name override; generated when absent.
    pub job_name: Option<String>,
}

impl HookRequest {
    /// A request for `hook` of `application` without overrides.
    pub fn new(application: Locator, hook: HookType) -> Self {
        Self {
            application,
            hook,
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            node_selector: BTreeMap::new(),
            env: Vec::new(),
            timeout: None,
            service_user: None,
            service_account: None,
            namespace: None,
            job_name: None,
        }
    }

    /// Add an environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        });
        self
    }

    /// Set the job deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the job name.
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }
}

/// Reference to a started hook job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookRef {
    /// Application the hook belongs to.
    pub application: Locator,
    /// Hook type.
    pub hook: HookType,
    /// Namespace of the job.
    pub namespace: String,
    /// Job name.
    pub name: String,
}

impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({} hook of {})", self.namespace, self.name, self.hook, self.application)
    }
}

/// Parameters for deleting a hook job.
#[derive(Debug, Clone)]
pub struct DeleteHookRequest {
    /// The job.
    pub hook_ref: HookRef,
    /// Also delete the job's pods.
    pub cascade: bool,
}

/// Writer receiving hook logs.
pub type LogWriter = dyn AsyncWrite + Send + Unpin;

/// Trait for hook executors.
///
/// Hooks are Kubernetes Jobs declared in application manifests. Executors are
/// responsible for launching them, following their logs and tearing them down.
#[async_trait]
pub trait AppHooks: Send + Sync {
    /// Launch the hook's job and return without waiting for it.
    async fn start_app_hook(&self, req: &HookRequest) -> Result<HookRef>;

    /// Block until the job finishes.
    ///
    /// Connection failures are resumed at a fixed interval up to a bounded
    /// number of attempts. A failed job is reported as [`HookError::Failed`].
    async fn wait_app_hook(&self, hook: &HookRef, cancel: &CancellationToken) -> Result<()>;

    /// Copy the job's logs to `out` until they end or `cancel` fires.
    async fn stream_app_hook_logs(
        &self,
        hook: &HookRef,
        out: &mut LogWriter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete the job. A job that is already gone is reported as not found.
    async fn delete_app_hook_job(&self, req: &DeleteHookRequest) -> Result<()>;
}
