// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for hook orchestration against the mock executor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SharedBuffer, app, backend_with_hooks};
use stevedore_core::HookType;
use stevedore_core::memory::MemoryBackend;
use stevedore_environment::hooks::job::job_name;
use stevedore_environment::hooks::{
    AppHooks, DeleteHookRequest, HookError, HookRef, HookRequest, MockHooks, WaitPolicy,
    cleanup_app_hook, run_app_hook,
};
use tokio_util::sync::CancellationToken;

fn fast_policy(attempts: u32) -> WaitPolicy {
    WaitPolicy {
        attempts,
        interval: Duration::from_millis(5),
    }
}

// ============================================================================
// Start / Delete
// ============================================================================

#[tokio::test]
async fn test_delete_twice_reports_not_found() {
    let hooks = MockHooks::new(backend_with_hooks(&[HookType::Install]).await);
    let hook = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Install))
        .await
        .unwrap();
    assert_eq!(hooks.job_count().await, 1);

    let req = DeleteHookRequest {
        hook_ref: hook,
        cascade: false,
    };
    hooks.delete_app_hook_job(&req).await.unwrap();

    let err = hooks.delete_app_hook_job(&req).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(hooks.job_count().await, 0);
}

#[tokio::test]
async fn test_start_missing_application() {
    let hooks = MockHooks::new(Arc::new(MemoryBackend::new()));
    let err = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Install))
        .await
        .unwrap_err();
    assert!(matches!(err, HookError::NotFound(_)));
}

#[tokio::test]
async fn test_start_undeclared_hook() {
    let hooks = MockHooks::new(backend_with_hooks(&[HookType::Install]).await);
    let err = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Backup))
        .await
        .unwrap_err();
    assert!(matches!(err, HookError::BadParameter(_)));
}

#[tokio::test]
async fn test_start_applies_request_overrides() {
    let hooks = MockHooks::never_completing(backend_with_hooks(&[HookType::Update]).await);
    let req = HookRequest::new(app(), HookType::Update)
        .with_env("CLUSTER", "prod")
        .with_timeout(Duration::from_secs(120))
        .with_job_name("sample-update");

    let hook = hooks.start_app_hook(&req).await.unwrap();
    assert_eq!(hook.name, "sample-update");

    let job = hooks.job("sample-update").await.unwrap();
    let spec = job.spec.unwrap();
    assert_eq!(spec.active_deadline_seconds, Some(120));
    let pod = spec.template.spec.unwrap();
    let env = pod.containers[0].env.clone().unwrap();
    assert_eq!(env[0].name, "CLUSTER");

    // Names are unique while the job exists.
    let err = hooks.start_app_hook(&req).await.unwrap_err();
    assert!(matches!(err, HookError::BadParameter(_)));
}

// ============================================================================
// Wait
// ============================================================================

#[tokio::test]
async fn test_wait_resumes_after_lost_connections() {
    let hooks = MockHooks::new(backend_with_hooks(&[HookType::Install]).await)
        .with_wait_policy(fast_policy(10));
    let hook = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Install))
        .await
        .unwrap();

    hooks.inject_wait_failures(3);
    hooks
        .wait_app_hook(&hook, &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wait_gives_up_after_attempts() {
    let hooks = MockHooks::never_completing(backend_with_hooks(&[HookType::Install]).await)
        .with_wait_policy(fast_policy(3));
    let hook = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Install))
        .await
        .unwrap();

    hooks.inject_wait_failures(100);
    let err = hooks
        .wait_app_hook(&hook, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_connection());
}

#[tokio::test]
async fn test_wait_for_explicitly_completed_job() {
    let hooks = Arc::new(MockHooks::never_completing(
        backend_with_hooks(&[HookType::Install]).await,
    ));
    let hook = hooks
        .start_app_hook(&HookRequest::new(app(), HookType::Install))
        .await
        .unwrap();

    let completer = {
        let hooks = hooks.clone();
        let name = hook.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            hooks.fail_job(&name, "DeadlineExceeded").await;
        })
    };

    let err = hooks
        .wait_app_hook(&hook, &CancellationToken::new())
        .await
        .unwrap_err();
    completer.await.unwrap();
    assert!(matches!(err, HookError::Failed { ref reason, .. } if reason == "DeadlineExceeded"));
}

// ============================================================================
// run_app_hook
// ============================================================================

#[tokio::test]
async fn test_run_app_hook_collects_complete_logs() {
    let hooks = Arc::new(MockHooks::new(
        backend_with_hooks(&[HookType::PostInstall]).await,
    ));
    let out = SharedBuffer::new();

    let hook = run_app_hook(
        hooks.clone(),
        &HookRequest::new(app(), HookType::PostInstall),
        out.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(hook.hook, HookType::PostInstall);
    assert_eq!(out.contents(), "hook started\nhook finished\n");
    assert!(out.is_closed());
}

#[tokio::test]
async fn test_run_app_hook_reports_failure_after_logs() {
    let hooks = Arc::new(MockHooks::failing(
        backend_with_hooks(&[HookType::Install]).await,
    ));
    let out = SharedBuffer::new();

    let err = run_app_hook(
        hooks,
        &HookRequest::new(app(), HookType::Install),
        out.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HookError::Failed { .. }));
    assert!(out.contents().contains("hook finished"));
    assert!(out.is_closed());
}

#[tokio::test]
async fn test_run_app_hook_cancellation_joins_log_task() {
    let hooks = Arc::new(MockHooks::never_completing(
        backend_with_hooks(&[HookType::Install]).await,
    ));
    let out = SharedBuffer::new();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let err = run_app_hook(
        hooks.clone(),
        &HookRequest::new(app(), HookType::Install),
        out.clone(),
        &cancel,
    )
    .await
    .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, HookError::Cancelled));
    // The log task finished before run_app_hook returned.
    assert!(out.is_closed());
    assert_eq!(hooks.job_count().await, 1);
}

#[tokio::test]
async fn test_run_app_hook_start_failure() {
    let hooks = Arc::new(MockHooks::new(Arc::new(MemoryBackend::new())));
    let out = SharedBuffer::new();

    let err = run_app_hook(
        hooks,
        &HookRequest::new(app(), HookType::Install),
        out.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_not_found());
    assert!(out.contents().is_empty());
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_cleanup_after_failed_hook_removes_job() {
    let hooks = Arc::new(MockHooks::failing(
        backend_with_hooks(&[HookType::Install]).await,
    ));
    let req = HookRequest::new(app(), HookType::Install);
    let req = req.clone().with_job_name(job_name(&req));
    let hook = HookRef {
        application: app(),
        hook: HookType::Install,
        namespace: hooks.namespace.clone(),
        name: req.job_name.clone().unwrap(),
    };

    let err = run_app_hook(hooks.clone(), &req, SharedBuffer::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HookError::Failed { .. }));
    assert_eq!(hooks.job_count().await, 1);

    cleanup_app_hook(&*hooks, hook.clone()).await.unwrap();
    assert_eq!(hooks.job_count().await, 0);

    // A job that is already gone counts as cleaned up.
    cleanup_app_hook(&*hooks, hook).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_when_hook_never_started() {
    let hooks = MockHooks::new(Arc::new(MemoryBackend::new()));
    let req = HookRequest::new(app(), HookType::Install);
    let hook = HookRef {
        application: app(),
        hook: HookType::Install,
        namespace: hooks.namespace.clone(),
        name: job_name(&req),
    };

    assert!(hooks.start_app_hook(&req).await.unwrap_err().is_not_found());
    cleanup_app_hook(&hooks, hook).await.unwrap();
}
