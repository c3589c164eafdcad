// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication of bundled registry contents into an image registry.
//!
//! Applications are processed one at a time: each package is unpacked into a
//! scratch directory and its `registry/` tree handed to the [`ImageRegistry`].
//! Applications without registry contents are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bundle::{self, REGISTRY_DIR};
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::progress::ProgressReporter;
use crate::registry::{ImageRegistry, SyncReport};
use crate::resolver::{Dependencies, Resolver};
use crate::retry::{RetryPolicy, retry_transient};
use crate::service::ServicePair;

/// Per-run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Applications whose registry contents were replicated.
    pub synced: usize,
    /// Applications without registry contents.
    pub skipped: usize,
    /// Combined registry report.
    pub registry: SyncReport,
}

/// Sequential registry replicator.
pub struct Syncer {
    src: ServicePair,
    registry: Arc<dyn ImageRegistry>,
    retry: RetryPolicy,
    scratch_dir: Option<PathBuf>,
    progress: Option<ProgressReporter>,
}

impl Syncer {
    /// Create a syncer reading application packages from `src`.
    pub fn new(src: ServicePair, registry: Arc<dyn ImageRegistry>) -> Self {
        Self {
            src,
            registry,
            retry: RetryPolicy::default(),
            scratch_dir: None,
            progress: None,
        }
    }

    /// Set the retry policy used while unpacking.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Unpack into temporary directories under `dir` instead of the system default.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Forward registry progress to `progress`.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Replicate registry contents of every application in `deps`.
    pub async fn sync(&self, cancel: &CancellationToken, deps: &Dependencies) -> Result<SyncSummary> {
        let locators: Vec<Locator> = deps.apps.iter().map(|a| a.package.clone()).collect();
        self.sync_all(cancel, &locators).await
    }

    /// Resolve `locator` on the source and replicate registry contents of the
    /// application and all its dependencies.
    pub async fn sync_app(&self, cancel: &CancellationToken, locator: &Locator) -> Result<SyncSummary> {
        let deps = Resolver::new(&self.src).resolve_locator(locator).await?;
        self.sync_resolved(cancel, locator, &deps).await
    }

    /// Replicate registry contents of `locator` and the applications in
    /// `deps`, which were already resolved for it.
    pub async fn sync_resolved(
        &self,
        cancel: &CancellationToken,
        locator: &Locator,
        deps: &Dependencies,
    ) -> Result<SyncSummary> {
        let mut locators: Vec<Locator> = deps.apps.iter().map(|a| a.package.clone()).collect();
        locators.push(locator.clone());
        self.sync_all(cancel, &locators).await
    }

    async fn sync_all(&self, cancel: &CancellationToken, apps: &[Locator]) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        let total = apps.len().max(1);
        for (i, locator) in apps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            // Each application reports within its own share of the range.
            let progress = self
                .progress
                .as_ref()
                .map(|p| p.within((i * 100 / total) as u8, ((i + 1) * 100 / total) as u8));
            match self.sync_one(cancel, locator, progress.as_ref()).await? {
                Some(report) => {
                    summary.synced += 1;
                    summary.registry.files_copied += report.files_copied;
                    summary.registry.files_skipped += report.files_skipped;
                    summary.registry.bytes_copied += report.bytes_copied;
                }
                None => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    async fn sync_one(
        &self,
        cancel: &CancellationToken,
        locator: &Locator,
        progress: Option<&ProgressReporter>,
    ) -> Result<Option<SyncReport>> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stevedore-sync-");
        let dir = match &self.scratch_dir {
            Some(scratch) => {
                tokio::fs::create_dir_all(scratch).await?;
                builder.tempdir_in(scratch)?
            }
            None => builder.tempdir()?,
        };

        let path = dir.path();
        retry_transient(self.retry, cancel, "unpack application", move || {
            self.unpack(locator, path)
        })
        .await
        .map_err(|e| e.wrap(format!("failed to unpack {}", locator)))?;

        let registry = dir.path().join(REGISTRY_DIR);
        if is_empty_dir(&registry).await? {
            warn!(app = %locator, "Application has no registry contents, skipping");
            return Ok(None);
        }

        let report = self
            .registry
            .sync(&registry, progress)
            .await
            .map_err(|e| e.wrap(format!("failed to sync registry of {}", locator)))?;
        info!(app = %locator, copied = report.files_copied, "Synced application registry");
        Ok(Some(report))
    }

    async fn unpack(&self, locator: &Locator, dir: &Path) -> Result<()> {
        let (_, reader) = self.src.packages.read_package(locator).await?;
        bundle::unpack_reader(reader, dir).await
    }
}

async fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    Ok(entries.next_entry().await?.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleBuilder;
    use crate::manifest::Manifest;
    use crate::memory::MemoryBackend;
    use crate::package::Labels;
    use crate::registry::DirectoryRegistry;
    use crate::service::AppService;

    fn loc(s: &str) -> Locator {
        s.parse().unwrap()
    }

    async fn add_bundle(backend: &MemoryBackend, manifest: &Manifest, registry: &[(&str, &[u8])]) {
        let mut builder = BundleBuilder::new(manifest).unwrap();
        for (path, data) in registry {
            builder = builder.registry_file(path, data.to_vec());
        }
        backend
            .insert_app(manifest, builder.build().unwrap(), Labels::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_app_includes_dependencies_and_skips_empty() {
        let backend = Arc::new(MemoryBackend::new());
        add_bundle(&backend, &Manifest::new(&loc("example.com/dep:1.0.0")), &[("dep-blob", b"d".as_slice())]).await;
        add_bundle(&backend, &Manifest::new(&loc("example.com/empty:1.0.0")), &[]).await;

        let mut top = Manifest::new(&loc("example.com/top:1.0.0"));
        top.dependencies.apps = vec![loc("example.com/dep:1.0.0"), loc("example.com/empty:1.0.0")];
        add_bundle(&backend, &top, &[("top-blob", b"t".as_slice())]).await;

        let registry_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let syncer = Syncer::new(
            ServicePair::from_shared(backend),
            Arc::new(DirectoryRegistry::new(registry_dir.path())),
        )
        .with_scratch_dir(scratch.path());

        let summary = syncer
            .sync_app(&CancellationToken::new(), &loc("example.com/top:1.0.0"))
            .await
            .unwrap();

        assert_eq!(summary.synced, 2);
        assert_eq!(summary.skipped, 1);
        assert!(registry_dir.path().join("dep-blob").is_file());
        assert!(registry_dir.path().join("top-blob").is_file());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sync_stops_when_cancelled() {
        let backend = Arc::new(MemoryBackend::new());
        let manifest = Manifest::new(&loc("example.com/app:1.0.0"));
        add_bundle(&backend, &manifest, &[("blob", b"x".as_slice())]).await;
        let app = backend.get_app(&loc("example.com/app:1.0.0")).await.unwrap();

        let mut deps = Dependencies::default();
        deps.apps.push(app);
        let registry_dir = tempfile::tempdir().unwrap();
        let syncer = Syncer::new(
            ServicePair::from_shared(backend),
            Arc::new(DirectoryRegistry::new(registry_dir.path())),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = syncer.sync(&cancel, &deps).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!registry_dir.path().join("blob").exists());
    }

    #[tokio::test]
    async fn test_corrupt_package_fails_without_retry() {
        let backend = Arc::new(MemoryBackend::new());
        let manifest = Manifest::new(&loc("example.com/app:1.0.0"));
        backend
            .insert_app(&manifest, b"not a bundle".to_vec(), Labels::new())
            .await
            .unwrap();

        let registry_dir = tempfile::tempdir().unwrap();
        let syncer = Syncer::new(
            ServicePair::from_shared(backend),
            Arc::new(DirectoryRegistry::new(registry_dir.path())),
        );
        let err = syncer
            .sync_app(&CancellationToken::new(), &loc("example.com/app:1.0.0"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to unpack example.com/app:1.0.0"));
    }
}
