// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package and application service interfaces.
//!
//! The resolver, puller and syncer are written purely against these traits.
//! Storage is provided elsewhere; [`crate::memory::MemoryBackend`] implements
//! both traits in memory for tests and embedding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::locator::Locator;
use crate::package::{Application, BlobReader, Labels, PackageEnvelope, PackageOptions};

/// Blob-level package operations.
#[async_trait]
pub trait PackageService: Send + Sync {
    /// Read package metadata without its contents.
    async fn read_package_envelope(&self, locator: &Locator) -> Result<PackageEnvelope>;

    /// Read package metadata and open its contents.
    async fn read_package(&self, locator: &Locator) -> Result<(PackageEnvelope, BlobReader)>;

    /// Store a new package. Fails with `AlreadyExists` if it is present.
    async fn create_package(
        &self,
        locator: &Locator,
        data: BlobReader,
        options: PackageOptions,
    ) -> Result<PackageEnvelope>;

    /// Store a package, replacing any existing one.
    async fn upsert_package(
        &self,
        locator: &Locator,
        data: BlobReader,
        options: PackageOptions,
    ) -> Result<PackageEnvelope>;

    /// Create the repository if needed, optionally expiring it after `ttl`.
    async fn upsert_repository(&self, name: &str, ttl: Option<Duration>) -> Result<()>;
}

/// Application-level operations.
#[async_trait]
pub trait AppService: Send + Sync {
    /// Look up an application and parse its manifest.
    async fn get_app(&self, locator: &Locator) -> Result<Application>;

    /// Store a new application with an explicit manifest.
    async fn create_app_with_manifest(
        &self,
        locator: &Locator,
        manifest: &[u8],
        data: BlobReader,
        labels: Labels,
    ) -> Result<Application>;

    /// Store an application with an explicit manifest, replacing any existing one.
    async fn upsert_app_with_manifest(
        &self,
        locator: &Locator,
        manifest: &[u8],
        data: BlobReader,
        labels: Labels,
    ) -> Result<Application>;

    /// Store an application bundle, reading the manifest from inside it.
    async fn upsert_app(&self, locator: &Locator, data: BlobReader, labels: Labels)
    -> Result<Application>;
}

/// A package service and an application service over the same storage.
#[derive(Clone)]
pub struct ServicePair {
    /// Package operations.
    pub packages: Arc<dyn PackageService>,
    /// Application operations.
    pub apps: Arc<dyn AppService>,
}

impl ServicePair {
    /// Build a pair from separate services.
    pub fn new(packages: Arc<dyn PackageService>, apps: Arc<dyn AppService>) -> Self {
        Self { packages, apps }
    }

    /// Build a pair from a single backend implementing both traits.
    pub fn from_shared<T>(backend: Arc<T>) -> Self
    where
        T: PackageService + AppService + 'static,
    {
        Self {
            packages: backend.clone(),
            apps: backend,
        }
    }
}

impl std::fmt::Debug for ServicePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePair").finish_non_exhaustive()
    }
}
