// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Human-readable differences between two snapshots of a hook's pods.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{ContainerState, ContainerStatus, Pod};

fn pod_key(pod: &Pod) -> (&str, &str) {
    (
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn container_statuses(pod: &Pod) -> impl Iterator<Item = &ContainerStatus> {
    pod.status.iter().flat_map(|s| {
        s.init_container_statuses
            .iter()
            .flatten()
            .chain(s.container_statuses.iter().flatten())
    })
}

/// Describe a container state as `running`, `waiting, reason R` or
/// `terminated, exit code N`.
pub fn describe_state(state: Option<&ContainerState>) -> String {
    let Some(state) = state else {
        return "unknown".to_string();
    };
    if let Some(terminated) = &state.terminated {
        return format!("terminated, exit code {}", terminated.exit_code);
    }
    if state.running.is_some() {
        return "running".to_string();
    }
    match state.waiting.as_ref().and_then(|w| w.reason.as_deref()) {
        Some(reason) => format!("waiting, reason {}", reason),
        None if state.waiting.is_some() => "waiting".to_string(),
        None => "unknown".to_string(),
    }
}

fn diff_containers(prev: &Pod, next: &Pod, out: &mut Vec<String>) {
    let before: HashMap<&str, &ContainerStatus> = container_statuses(prev)
        .map(|c| (c.name.as_str(), c))
        .collect();

    for current in container_statuses(next) {
        let state = describe_state(current.state.as_ref());
        let Some(previous) = before.get(current.name.as_str()) else {
            out.push(format!("Container {:?} is {}.", current.name, state));
            continue;
        };
        if current.restart_count > previous.restart_count {
            out.push(format!(
                "Container {:?} restarted, current state is {:?}.",
                current.name, state
            ));
        } else if describe_state(previous.state.as_ref()) != state {
            out.push(format!("Container {:?} is now {}.", current.name, state));
        }
    }
}

/// Compare two pod snapshots.
///
/// Reports created and deleted pods, phase transitions and per-container
/// state and restart changes, in the order of `next` followed by deletions.
pub fn diff_pods(prev: &[Pod], next: &[Pod]) -> Vec<String> {
    let before: HashMap<(&str, &str), &Pod> = prev.iter().map(|p| (pod_key(p), p)).collect();
    let mut out = Vec::new();

    for pod in next {
        let name = pod_key(pod).1;
        match before.get(&pod_key(pod)) {
            None => {
                out.push(format!("Pod {:?} created, phase {}.", name, phase(pod)));
                diff_containers(&Pod::default(), pod, &mut out);
            }
            Some(old) => {
                if phase(old) != phase(pod) {
                    out.push(format!(
                        "Pod {:?} changed phase from {} to {}.",
                        name,
                        phase(old),
                        phase(pod)
                    ));
                }
                diff_containers(old, pod, &mut out);
            }
        }
    }

    let after: HashMap<(&str, &str), &Pod> = next.iter().map(|p| (pod_key(p), p)).collect();
    for pod in prev {
        if !after.contains_key(&pod_key(pod)) {
            out.push(format!("Pod {:?} deleted.", pod_key(pod).1));
        }
    }

    out
}
