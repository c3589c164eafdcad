// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stevedore Core - Packages, Dependencies and Replication
//!
//! This crate models packaged Kubernetes applications and moves them between
//! package stores. It resolves an application's transitive dependencies,
//! replicates packages and applications with bounded parallelism, and copies
//! bundled container registry contents into an image registry.
//!
//! # Architecture
//!
//! ```text
//!                ┌────────────────────┐
//!                │      Importer      │  OperationHandle<Dependencies>
//!                └─────────┬──────────┘
//!                          │
//!        ┌─────────────────┼──────────────────┐
//!        ▼                 ▼                  ▼
//! ┌─────────────┐   ┌─────────────┐    ┌─────────────┐
//! │  Resolver   │   │   Puller    │    │   Syncer    │
//! │ (DFS, post- │   │ (task per   │    │ (sequential │
//! │  order)     │   │  item)      │    │  per app)   │
//! └──────┬──────┘   └──────┬──────┘    └──────┬──────┘
//!        │                 │                  │
//!        ▼                 ▼                  ▼
//! ┌───────────────────────────────────┐ ┌─────────────┐
//! │  PackageService / AppService      │ │ImageRegistry│
//! │  (source and destination pairs)   │ │             │
//! └───────────────────────────────────┘ └─────────────┘
//! ```
//!
//! # Dependency Resolution
//!
//! | Rule | Behaviour |
//! |------|-----------|
//! | Order | Dependencies precede dependents |
//! | Base application | Visited before sibling dependencies |
//! | Duplicates | Every locator appears at most once |
//! | Runtime package | Chosen by the top-level application, listed last |
//! | Cycles | Rejected with `DependencyCycle` |
//!
//! # Modules
//!
//! - [`locator`]: Package identity
//! - [`manifest`]: Application manifest data model
//! - [`package`]: Package envelopes and applications
//! - [`service`]: Package and application service traits
//! - [`memory`]: In-memory service implementation
//! - [`resolver`]: Dependency resolution
//! - [`pull`]: Package and application replication
//! - [`sync`]: Registry replication
//! - [`import`]: Import pipeline

#![deny(missing_docs)]

/// Application bundle encoding.
pub mod bundle;

/// Error types and classification.
pub mod error;

/// Application import pipeline.
pub mod import;

/// Package identity.
pub mod locator;

/// Application manifest.
pub mod manifest;

/// In-memory package and application store.
pub mod memory;

/// Package envelopes and applications.
pub mod package;

/// Progress reporting and operation handles.
pub mod progress;

/// Package and application replication.
pub mod pull;

/// Container image registry interface.
pub mod registry;

/// Transitive dependency resolution.
pub mod resolver;

/// Fixed-interval retry of transient failures.
pub mod retry;

/// Package and application service traits.
pub mod service;

/// Registry contents replication.
pub mod sync;

pub use error::{Error, Result};
pub use locator::Locator;
pub use manifest::{HookType, Manifest};
pub use package::{Application, BlobReader, PackageEnvelope};
pub use resolver::{Dependencies, Resolver};
pub use service::{AppService, PackageService, ServicePair};
