// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hook job rendering.
//!
//! A hook's Job is taken verbatim from the manifest; only the request
//! overrides and the stevedore labels are applied on top.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodSecurityContext;
use serde_json::Value;
use stevedore_core::manifest::Hook;
use stevedore_core::AppService;
use tracing::debug;
use uuid::Uuid;

use super::traits::{HookError, HookRequest, Result};

/// Label carrying the application name.
pub const LABEL_APP_NAME: &str = "stevedore.io/app-name";
/// Label carrying the application version.
pub const LABEL_APP_VERSION: &str = "stevedore.io/app-version";
/// Label carrying the hook type.
pub const LABEL_HOOK: &str = "stevedore.io/hook";

const MAX_NAME_LEN: usize = 63;

/// Look up the hook the request names.
///
/// A missing application is `NotFound`; an application that does not declare
/// the hook is `BadParameter`.
pub async fn resolve_hook(apps: &dyn AppService, req: &HookRequest) -> Result<Hook> {
    let app = apps.get_app(&req.application).await.map_err(|e| {
        if e.is_not_found() {
            HookError::NotFound(format!("application {}", req.application))
        } else {
            HookError::Core(e)
        }
    })?;
    app.manifest.hook(req.hook).cloned().ok_or_else(|| {
        HookError::BadParameter(format!(
            "application {} does not declare a {} hook",
            req.application, req.hook
        ))
    })
}

/// Job name for the request: the override, or `<app>-<hook>-<suffix>`.
pub fn job_name(req: &HookRequest) -> String {
    if let Some(name) = &req.job_name {
        return name.clone();
    }
    let suffix = Uuid::new_v4().simple().to_string();
    let base = dns_label(&format!("{}-{}", req.application.name, req.hook.as_str()));
    let base = if base.is_empty() { "hook" } else { base.as_str() };
    format!("{}-{}", base, &suffix[..8])
}

/// Lowercase alphanumerics separated by single dashes, short enough to take a suffix.
fn dns_label(value: &str) -> String {
    let mut label = String::new();
    for c in value.chars().map(|c| c.to_ascii_lowercase()) {
        if c.is_ascii_alphanumeric() {
            label.push(c);
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
        if label.len() >= MAX_NAME_LEN - 9 {
            break;
        }
    }
    label.trim_end_matches('-').to_string()
}

fn label_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect()
}

fn hook_labels(req: &HookRequest) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP_NAME.to_string(), label_value(&req.application.name)),
        (
            LABEL_APP_VERSION.to_string(),
            label_value(&req.application.version.to_string()),
        ),
        (LABEL_HOOK.to_string(), req.hook.as_str().to_string()),
    ])
}

/// Build the Job for `hook` with the overrides of `req` applied.
pub fn render_job(hook: &Hook, req: &HookRequest, namespace: &str, name: &str) -> Result<Job> {
    let mut value = hook.job.clone();
    let Value::Object(fields) = &mut value else {
        return Err(HookError::BadParameter(format!(
            "{} hook of {} is not a job object",
            req.hook, req.application
        )));
    };
    fields
        .entry("apiVersion")
        .or_insert_with(|| Value::from("batch/v1"));
    fields.entry("kind").or_insert_with(|| Value::from("Job"));

    let mut job: Job = serde_json::from_value(value)?;
    let labels = hook_labels(req);

    job.metadata.name = Some(name.to_string());
    job.metadata.generate_name = None;
    job.metadata.namespace = Some(namespace.to_string());
    job.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.clone());

    let spec = job
        .spec
        .as_mut()
        .ok_or_else(|| HookError::BadParameter(format!("{} hook job has no spec", req.hook)))?;
    if let Some(timeout) = req.timeout {
        spec.active_deadline_seconds = Some(timeout.as_secs().max(1) as i64);
    }

    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels);

    let pod = spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| HookError::BadParameter(format!("{} hook job has no pod spec", req.hook)))?;
    if pod.containers.is_empty() {
        return Err(HookError::BadParameter(format!(
            "{} hook job has no containers",
            req.hook
        )));
    }

    pod.restart_policy.get_or_insert_with(|| "Never".to_string());
    if !req.volumes.is_empty() {
        pod.volumes
            .get_or_insert_with(Vec::new)
            .extend(req.volumes.iter().cloned());
    }
    if !req.node_selector.is_empty() {
        pod.node_selector
            .get_or_insert_with(BTreeMap::new)
            .extend(req.node_selector.clone());
    }
    if let Some(account) = &req.service_account {
        pod.service_account_name = Some(account.clone());
    }
    if let Some(user) = &req.service_user {
        pod.security_context
            .get_or_insert_with(PodSecurityContext::default)
            .run_as_user = Some(user.uid);
    }

    let containers = pod
        .containers
        .iter_mut()
        .chain(pod.init_containers.iter_mut().flatten());
    for container in containers {
        if !req.env.is_empty() {
            container
                .env
                .get_or_insert_with(Vec::new)
                .extend(req.env.iter().cloned());
        }
        if !req.volume_mounts.is_empty() {
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .extend(req.volume_mounts.iter().cloned());
        }
    }

    debug!(job = name, namespace, hook = %req.hook, app = %req.application, "Rendered hook job");
    Ok(job)
}
