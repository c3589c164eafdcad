// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for stevedore-core integration tests.
//!
//! Provides TestContext with a source and a destination in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use stevedore_core::bundle::BundleBuilder;
use stevedore_core::memory::MemoryBackend;
use stevedore_core::package::Labels;
use stevedore_core::{Application, Locator, Manifest, ServicePair};

/// Parse a locator, panicking on malformed input.
pub fn loc(s: &str) -> Locator {
    s.parse().expect("valid locator")
}

/// Source and destination stores for replication tests.
pub struct TestContext {
    pub src: Arc<MemoryBackend>,
    pub dst: Arc<MemoryBackend>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            src: Arc::new(MemoryBackend::new()),
            dst: Arc::new(MemoryBackend::new()),
        }
    }

    pub fn src_services(&self) -> ServicePair {
        ServicePair::from_shared(self.src.clone())
    }

    pub fn dst_services(&self) -> ServicePair {
        ServicePair::from_shared(self.dst.clone())
    }

    /// Store a package with the given contents in the source.
    pub async fn add_package(&self, locator: &str, data: &[u8]) {
        self.src
            .insert_package(&loc(locator), data.to_vec())
            .await
            .expect("Failed to add package");
    }

    /// Store an application bundle in the source.
    pub async fn add_app(&self, manifest: AppSpec) -> Application {
        let bundle = BundleBuilder::new(&manifest.manifest)
            .expect("Failed to encode manifest")
            .build()
            .expect("Failed to build bundle");
        self.src
            .insert_app(&manifest.manifest, bundle, Labels::new())
            .await
            .expect("Failed to add application")
    }
}

/// Fluent manifest builder for tests.
pub struct AppSpec {
    pub manifest: Manifest,
}

impl AppSpec {
    pub fn new(locator: &str) -> Self {
        Self {
            manifest: Manifest::new(&loc(locator)),
        }
    }

    pub fn package(mut self, locator: &str) -> Self {
        self.manifest.dependencies.packages.push(loc(locator));
        self
    }

    pub fn app(mut self, locator: &str) -> Self {
        self.manifest.dependencies.apps.push(loc(locator));
        self
    }

    pub fn base(mut self, locator: &str) -> Self {
        self.manifest.base = Some(loc(locator));
        self
    }

    pub fn runtime(mut self, locator: &str) -> Self {
        self.manifest.system_options.runtime_package = Some(loc(locator));
        self
    }
}
