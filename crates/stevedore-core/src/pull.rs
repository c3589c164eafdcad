// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication of packages and applications between services.
//!
//! [`Puller`] copies every package and application of a resolved
//! [`Dependencies`] set from a source [`ServicePair`] to a destination one.
//! Each item is transferred by its own task; [`PullerConfig::parallel`] bounds
//! how many run at once:
//!
//! | `parallel` | Behaviour |
//! |------------|-----------|
//! | `< 0`      | unbounded |
//! | `0`, `1`   | sequential |
//! | `> 1`      | at most `parallel` in flight |
//!
//! Each transfer retries transient failures within [`PullerConfig::retry`].
//! When the destination already holds an item, `skip_if_exists` and `upsert`
//! decide between skipping, failing with `AlreadyExists` and overwriting. A
//! metadata-only placeholder application at the destination is always replaced.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::package::{BlobReader, Labels, PackageOptions, merge_labels};
use crate::resolver::{Dependencies, Resolver};
use crate::retry::{RetryPolicy, retry_transient};
use crate::service::ServicePair;

/// Transfer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullerConfig {
    /// Maximum transfers in flight, see the module docs.
    pub parallel: i32,
    /// Succeed without transferring when the destination has the item.
    pub skip_if_exists: bool,
    /// Overwrite items already present at the destination.
    pub upsert: bool,
    /// Copy envelopes only, with empty contents.
    pub metadata_only: bool,
    /// Labels applied on top of the source runtime labels.
    pub labels: Labels,
    /// Transient failure retry policy, applied per item.
    pub retry: RetryPolicy,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            parallel: -1,
            skip_if_exists: false,
            upsert: false,
            metadata_only: false,
            labels: Labels::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The item was written to the destination.
    Transferred,
    /// The destination already had the item.
    Skipped,
}

/// Counts of transferred and skipped items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Items written to the destination.
    pub transferred: usize,
    /// Items left untouched because they existed.
    pub skipped: usize,
}

impl PullStats {
    fn record(&mut self, outcome: PullOutcome) {
        match outcome {
            PullOutcome::Transferred => self.transferred += 1,
            PullOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// A single package or application transfer.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// Where the item is read from.
    pub src: ServicePair,
    /// Where the item is written to.
    pub dst: ServicePair,
    /// The item.
    pub locator: Locator,
    /// Transfer settings.
    pub config: PullerConfig,
}

/// Copy a single package, retrying transient failures.
pub async fn pull_package(req: &PullRequest, cancel: &CancellationToken) -> Result<PullOutcome> {
    retry_transient(req.config.retry, cancel, "pull package", move || {
        transfer_package(req)
    })
    .await
    .map_err(|e| e.wrap(format!("failed to pull package {}", req.locator)))
}

/// Copy a single application, retrying transient failures.
pub async fn pull_app(req: &PullRequest, cancel: &CancellationToken) -> Result<PullOutcome> {
    retry_transient(req.config.retry, cancel, "pull application", move || {
        transfer_app(req)
    })
    .await
    .map_err(|e| e.wrap(format!("failed to pull application {}", req.locator)))
}

fn empty_blob() -> BlobReader {
    Box::new(tokio::io::empty())
}

async fn transfer_package(req: &PullRequest) -> Result<PullOutcome> {
    let PullRequest {
        src,
        dst,
        locator,
        config,
    } = req;

    let exists = match dst.packages.read_package_envelope(locator).await {
        Ok(_) => true,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e),
    };
    if exists {
        if config.skip_if_exists {
            debug!(package = %locator, "Package exists, skipping");
            return Ok(PullOutcome::Skipped);
        }
        if !config.upsert {
            return Err(Error::package_exists(locator));
        }
    }

    dst.packages
        .upsert_repository(&locator.repository, None)
        .await?;

    let (envelope, data) = if config.metadata_only {
        (src.packages.read_package_envelope(locator).await?, empty_blob())
    } else {
        src.packages.read_package(locator).await?
    };
    let labels = merge_labels(&envelope.runtime_labels, &config.labels);
    let options = PackageOptions::from_envelope(&envelope, labels);

    if exists {
        dst.packages.upsert_package(locator, data, options).await?;
    } else {
        dst.packages.create_package(locator, data, options).await?;
    }
    info!(package = %locator, metadata_only = config.metadata_only, upsert = exists, "Pulled package");
    Ok(PullOutcome::Transferred)
}

async fn transfer_app(req: &PullRequest) -> Result<PullOutcome> {
    let PullRequest {
        src,
        dst,
        locator,
        config,
    } = req;

    let existing = match dst.apps.get_app(locator).await {
        Ok(app) => Some(app),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    if let Some(existing) = &existing {
        if existing.envelope.is_metadata() {
            if config.metadata_only && config.skip_if_exists {
                debug!(app = %locator, "Placeholder exists, skipping");
                return Ok(PullOutcome::Skipped);
            }
            debug!(app = %locator, "Replacing metadata placeholder");
        } else {
            if config.skip_if_exists {
                debug!(app = %locator, "Application exists, skipping");
                return Ok(PullOutcome::Skipped);
            }
            if !config.upsert {
                return Err(Error::app_exists(locator));
            }
        }
    }

    dst.packages
        .upsert_repository(&locator.repository, None)
        .await?;

    let app = src.apps.get_app(locator).await?;
    let manifest = match &app.envelope.manifest {
        Some(bytes) => bytes.clone(),
        None => app.manifest.to_bytes()?,
    };
    let labels = merge_labels(&app.envelope.runtime_labels, &config.labels);
    let data = if config.metadata_only {
        empty_blob()
    } else {
        src.packages.read_package(locator).await?.1
    };

    if existing.is_some() {
        dst.apps
            .upsert_app_with_manifest(locator, &manifest, data, labels)
            .await?;
    } else {
        dst.apps
            .create_app_with_manifest(locator, &manifest, data, labels)
            .await?;
    }
    info!(app = %locator, metadata_only = config.metadata_only, upsert = existing.is_some(), "Pulled application");
    Ok(PullOutcome::Transferred)
}

#[derive(Debug, Clone, Copy)]
enum ItemKind {
    Package,
    App,
}

/// Concurrent replication of dependency sets.
pub struct Puller {
    src: ServicePair,
    dst: ServicePair,
    config: PullerConfig,
}

impl Puller {
    /// Create a puller copying from `src` to `dst`.
    pub fn new(src: ServicePair, dst: ServicePair, config: PullerConfig) -> Self {
        Self { src, dst, config }
    }

    /// The transfer settings.
    pub fn config(&self) -> &PullerConfig {
        &self.config
    }

    /// Copy every package and application of `deps`.
    ///
    /// All transfers run to completion; the first failure in scheduling order
    /// is returned.
    pub async fn pull(&self, deps: &Dependencies, cancel: &CancellationToken) -> Result<PullStats> {
        let semaphore = match self.config.parallel {
            n if n < 0 => None,
            0 | 1 => Some(Arc::new(Semaphore::new(1))),
            n => Some(Arc::new(Semaphore::new(n as usize))),
        };

        let items = deps
            .packages
            .iter()
            .map(|p| (ItemKind::Package, p.locator.clone()))
            .chain(deps.apps.iter().map(|a| (ItemKind::App, a.package.clone())));

        let tasks: Vec<(Locator, JoinHandle<Result<PullOutcome>>)> = items
            .map(|(kind, locator)| {
                let task = self.spawn(kind, locator.clone(), semaphore.clone(), cancel.clone());
                (locator, task)
            })
            .collect();

        info!(
            items = tasks.len(),
            parallel = self.config.parallel,
            "Pulling dependencies"
        );

        let mut stats = PullStats::default();
        let mut first_error = None;
        for (locator, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(Error::Other(format!("pull task for {} failed: {}", locator, e))),
            };
            match result {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    warn!(item = %locator, error = %e, "Pull failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Resolve `locator` on the source, copy its dependencies, then the application itself.
    pub async fn pull_app(&self, locator: &Locator, cancel: &CancellationToken) -> Result<PullStats> {
        let deps = Resolver::new(&self.src).resolve_locator(locator).await?;
        let mut stats = self.pull(&deps, cancel).await?;

        let outcome = pull_app(&self.request(locator.clone()), cancel).await?;
        stats.record(outcome);
        Ok(stats)
    }

    fn request(&self, locator: Locator) -> PullRequest {
        PullRequest {
            src: self.src.clone(),
            dst: self.dst.clone(),
            locator,
            config: self.config.clone(),
        }
    }

    fn spawn(
        &self,
        kind: ItemKind,
        locator: Locator,
        semaphore: Option<Arc<Semaphore>>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<PullOutcome>> {
        let req = self.request(locator);
        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => Some(tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    permit = semaphore.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
                }),
                None => None,
            };
            match kind {
                ItemKind::Package => pull_package(&req, &cancel).await,
                ItemKind::App => pull_app(&req, &cancel).await,
            }
        })
    }
}
