// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory package and application backend.
//!
//! Used by tests and by embedders that replicate between short-lived stores.
//! It can inject transient connection failures to exercise retry paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::bundle;
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::manifest::Manifest;
use crate::package::{
    Application, BlobReader, Labels, PackageEnvelope, PackageKind, PackageOptions,
};
use crate::service::{AppService, PackageService};

#[derive(Debug, Clone)]
struct StoredPackage {
    envelope: PackageEnvelope,
    data: Vec<u8>,
}

/// Package and application storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    packages: RwLock<HashMap<Locator, StoredPackage>>,
    repositories: RwLock<HashSet<String>>,
    transient_failures: AtomicU32,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with a connection error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful package writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether the backend holds the package.
    pub async fn contains(&self, locator: &Locator) -> bool {
        self.packages.read().await.contains_key(locator)
    }

    /// Raw contents of a stored package.
    pub async fn blob(&self, locator: &Locator) -> Option<Vec<u8>> {
        self.packages
            .read()
            .await
            .get(locator)
            .map(|p| p.data.clone())
    }

    /// Whether the repository has been created.
    pub async fn has_repository(&self, name: &str) -> bool {
        self.repositories.read().await.contains(name)
    }

    /// Store an application from a manifest and raw contents, creating its repository.
    pub async fn insert_app(&self, manifest: &Manifest, data: Vec<u8>, labels: Labels) -> Result<Application> {
        let locator = manifest.locator();
        self.upsert_repository(&locator.repository, None).await?;
        self.create_app_with_manifest(&locator, &manifest.to_bytes()?, Box::new(std::io::Cursor::new(data)), labels)
            .await
    }

    /// Store a plain package, creating its repository.
    pub async fn insert_package(&self, locator: &Locator, data: Vec<u8>) -> Result<PackageEnvelope> {
        self.upsert_repository(&locator.repository, None).await?;
        self.create_package(
            locator,
            Box::new(std::io::Cursor::new(data)),
            PackageOptions::default(),
        )
        .await
    }

    fn check_connection(&self) -> Result<()> {
        let consumed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(Error::Connection("injected connection failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    async fn write(
        &self,
        locator: &Locator,
        mut data: BlobReader,
        options: PackageOptions,
        overwrite: bool,
    ) -> Result<PackageEnvelope> {
        self.check_connection()?;
        if !self.has_repository(&locator.repository).await {
            return Err(Error::NotFound {
                kind: "repository",
                id: locator.repository.clone(),
            });
        }

        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).await?;

        let mut packages = self.packages.write().await;
        if !overwrite && packages.contains_key(locator) {
            return Err(Error::package_exists(locator));
        }

        let envelope = PackageEnvelope {
            locator: locator.clone(),
            size_bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            kind: options.kind,
            manifest: options.manifest,
            runtime_labels: options.labels,
            hidden: options.hidden,
            base: None,
            created: Utc::now(),
        };
        packages.insert(
            locator.clone(),
            StoredPackage {
                envelope: envelope.clone(),
                data: bytes,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(package = %locator, size = envelope.size_bytes, overwrite, "Stored package");
        Ok(envelope)
    }

    async fn write_app(
        &self,
        locator: &Locator,
        manifest: &[u8],
        data: BlobReader,
        labels: Labels,
        overwrite: bool,
    ) -> Result<Application> {
        let parsed = Manifest::from_bytes(manifest)?;
        let options = PackageOptions {
            kind: PackageKind::Application,
            manifest: Some(manifest.to_vec()),
            labels,
            hidden: false,
        };
        let mut envelope = self.write(locator, data, options, overwrite).await?;
        if let Some(base) = parsed.base() {
            envelope.base = Some(base.clone());
            if let Some(stored) = self.packages.write().await.get_mut(locator) {
                stored.envelope.base = Some(base.clone());
            }
        }
        Ok(Application {
            package: locator.clone(),
            envelope,
            manifest: parsed,
        })
    }
}

#[async_trait]
impl PackageService for MemoryBackend {
    async fn read_package_envelope(&self, locator: &Locator) -> Result<PackageEnvelope> {
        self.check_connection()?;
        self.packages
            .read()
            .await
            .get(locator)
            .map(|p| p.envelope.clone())
            .ok_or_else(|| Error::package_not_found(locator))
    }

    async fn read_package(&self, locator: &Locator) -> Result<(PackageEnvelope, BlobReader)> {
        self.check_connection()?;
        let packages = self.packages.read().await;
        let stored = packages
            .get(locator)
            .ok_or_else(|| Error::package_not_found(locator))?;
        Ok((
            stored.envelope.clone(),
            Box::new(std::io::Cursor::new(stored.data.clone())),
        ))
    }

    async fn create_package(
        &self,
        locator: &Locator,
        data: BlobReader,
        options: PackageOptions,
    ) -> Result<PackageEnvelope> {
        self.write(locator, data, options, false).await
    }

    async fn upsert_package(
        &self,
        locator: &Locator,
        data: BlobReader,
        options: PackageOptions,
    ) -> Result<PackageEnvelope> {
        self.write(locator, data, options, true).await
    }

    async fn upsert_repository(&self, name: &str, _ttl: Option<Duration>) -> Result<()> {
        self.check_connection()?;
        if name.is_empty() {
            return Err(Error::BadParameter("missing repository name".to_string()));
        }
        self.repositories.write().await.insert(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl AppService for MemoryBackend {
    async fn get_app(&self, locator: &Locator) -> Result<Application> {
        let envelope = self
            .read_package_envelope(locator)
            .await
            .map_err(|e| if e.is_not_found() { Error::app_not_found(locator) } else { e })?;
        let manifest = envelope
            .manifest
            .as_deref()
            .ok_or_else(|| Error::BadParameter(format!("{} is not an application", locator)))?;
        let manifest = Manifest::from_bytes(manifest)?;
        Ok(Application {
            package: locator.clone(),
            envelope,
            manifest,
        })
    }

    async fn create_app_with_manifest(
        &self,
        locator: &Locator,
        manifest: &[u8],
        data: BlobReader,
        labels: Labels,
    ) -> Result<Application> {
        self.write_app(locator, manifest, data, labels, false)
            .await
            .map_err(|e| if e.is_already_exists() { Error::app_exists(locator) } else { e })
    }

    async fn upsert_app_with_manifest(
        &self,
        locator: &Locator,
        manifest: &[u8],
        data: BlobReader,
        labels: Labels,
    ) -> Result<Application> {
        self.write_app(locator, manifest, data, labels, true).await
    }

    async fn upsert_app(
        &self,
        locator: &Locator,
        mut data: BlobReader,
        labels: Labels,
    ) -> Result<Application> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).await?;
        let manifest = bundle::read_manifest(&bytes)?;
        self.write_app(
            locator,
            &manifest,
            Box::new(std::io::Cursor::new(bytes)),
            labels,
            true,
        )
        .await
    }
}
