// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stevedore Hook Runner
//!
//! Runs one lifecycle hook of an application bundle against the current
//! Kubernetes cluster:
//! - Loads the bundle and copies its registry contents under `DATA_DIR`
//! - Starts the hook job and streams its logs to stdout
//! - Deletes the job and its pods once it finishes

use std::io::Cursor;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stevedore_core::bundle;
use stevedore_core::memory::MemoryBackend;
use stevedore_core::package::Labels;
use stevedore_core::registry::DirectoryRegistry;
use stevedore_core::sync::Syncer;
use stevedore_core::{AppService, HookType, Manifest, PackageService, ServicePair};
use stevedore_environment::config::Config;
use stevedore_environment::hooks::job::job_name;
use stevedore_environment::hooks::{
    HookRef, HookRequest, KubeHooks, cleanup_app_hook, run_app_hook,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stevedore_environment=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let (Some(bundle_path), Some(hook)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: stevedore-hook <bundle.tar.gz> <hook>");
    };
    let hook: HookType = hook.parse()?;

    // Load configuration
    let config = Config::from_env()?;

    info!(
        bundle = %bundle_path,
        hook = %hook,
        namespace = %config.hook_namespace,
        data_dir = %config.data_dir.display(),
        "Starting Stevedore hook runner"
    );

    let data = tokio::fs::read(&bundle_path)
        .await
        .with_context(|| format!("reading bundle {}", bundle_path))?;
    let manifest = Manifest::from_bytes(&bundle::read_manifest(&data)?)?;
    let locator = manifest.locator();

    let backend = Arc::new(MemoryBackend::new());
    backend.upsert_repository(&locator.repository, None).await?;
    backend
        .upsert_app(&locator, Box::new(Cursor::new(data)), Labels::new())
        .await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let summary = Syncer::new(
        ServicePair::from_shared(backend.clone()),
        Arc::new(DirectoryRegistry::new(config.data_dir.join("registry"))),
    )
    .with_retry(config.retry_policy())
    .with_scratch_dir(&config.data_dir)
    .sync_app(&cancel, &locator)
    .await?;
    info!(
        synced = summary.synced,
        skipped = summary.skipped,
        "Registry contents ready"
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to cluster");

    let apps: Arc<dyn AppService> = backend;
    let hooks = Arc::new(
        KubeHooks::new(client, apps, config.hook_namespace.clone())
            .with_wait_policy(config.wait_policy())
            .with_poll_interval(config.hook_poll_interval),
    );

    // The job name is fixed up front so the job can be removed whatever happens.
    let req = HookRequest::new(locator, hook);
    let name = job_name(&req);
    let req = req.with_job_name(name.clone());
    let hook_ref = HookRef {
        application: req.application.clone(),
        hook: req.hook,
        namespace: config.hook_namespace.clone(),
        name,
    };

    let result = run_app_hook(hooks.clone(), &req, tokio::io::stdout(), &cancel).await;
    let cleanup = cleanup_app_hook(&*hooks, hook_ref).await;
    result.context("hook did not complete")?;
    cleanup.context("failed to delete hook job")?;

    info!("Stevedore hook runner finished");

    Ok(())
}
