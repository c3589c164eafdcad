// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application import pipeline: resolve, pull, then sync registry contents.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::locator::Locator;
use crate::progress::{OperationHandle, ProgressReporter};
use crate::pull::{PullRequest, Puller, PullerConfig, pull_app};
use crate::registry::ImageRegistry;
use crate::resolver::{Dependencies, OptionalDependencies, Resolver};
use crate::service::ServicePair;
use crate::sync::Syncer;

/// Imports applications into a destination service.
#[derive(Clone)]
pub struct Importer {
    dst: ServicePair,
    registry: Option<Arc<dyn ImageRegistry>>,
    config: PullerConfig,
    optional: OptionalDependencies,
    scratch_dir: Option<PathBuf>,
}

impl Importer {
    /// Create an importer writing to `dst`.
    pub fn new(dst: ServicePair, config: PullerConfig) -> Self {
        Self {
            dst,
            registry: None,
            config,
            optional: OptionalDependencies::default(),
            scratch_dir: None,
        }
    }

    /// Also replicate bundled registry contents into `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn ImageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the optional dependency list.
    pub fn with_optional_dependencies(mut self, optional: OptionalDependencies) -> Self {
        self.optional = optional;
        self
    }

    /// Unpack bundles under `dir`.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Start importing `locator` and its dependencies from `src`.
    ///
    /// The handle yields the resolved dependencies once everything is in place.
    pub fn import_app(
        &self,
        src: ServicePair,
        locator: Locator,
        cancel: &CancellationToken,
    ) -> OperationHandle<Dependencies> {
        let importer = self.clone();
        OperationHandle::spawn(cancel, move |progress, cancel| async move {
            importer.run(src, locator, progress, cancel).await
        })
    }

    async fn run(
        self,
        src: ServicePair,
        locator: Locator,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Dependencies> {
        progress.report(5, format!("Resolving dependencies of {}", locator));
        let deps = Resolver::new(&src)
            .with_optional_dependencies(self.optional.clone())
            .resolve_locator(&locator)
            .await?;

        progress.report(
            20,
            format!(
                "Pulling {} packages and {} applications",
                deps.packages.len(),
                deps.apps.len()
            ),
        );
        let puller = Puller::new(src.clone(), self.dst.clone(), self.config.clone());
        let stats = puller.pull(&deps, &cancel).await?;

        progress.report(60, format!("Pulling {}", locator));
        let req = PullRequest {
            src,
            dst: self.dst.clone(),
            locator: locator.clone(),
            config: self.config.clone(),
        };
        pull_app(&req, &cancel).await?;

        if let Some(registry) = &self.registry {
            progress.report(70, "Synchronizing registry");
            let mut syncer = Syncer::new(self.dst.clone(), registry.clone())
                .with_retry(self.config.retry)
                .with_progress(progress.within(70, 100));
            if let Some(dir) = &self.scratch_dir {
                syncer = syncer.with_scratch_dir(dir);
            }
            // Only what was pulled: disabled optional applications are not in dst.
            syncer.sync_resolved(&cancel, &locator, &deps).await?;
        }

        info!(
            app = %locator,
            transferred = stats.transferred,
            skipped = stats.skipped,
            "Imported application"
        );
        progress.complete(format!("Imported {}", locator));
        Ok(deps)
    }
}
