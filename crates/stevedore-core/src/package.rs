// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package and application records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::locator::Locator;
use crate::manifest::Manifest;

/// Streaming package contents.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Runtime labels attached to a package. Mutable, not part of content identity.
pub type Labels = BTreeMap<String, String>;

/// Label key describing what a package is used for.
pub const PURPOSE_LABEL: &str = "purpose";

/// [`PURPOSE_LABEL`] value marking a metadata-only placeholder package.
pub const PURPOSE_METADATA: &str = "metadata";

/// Kind of content a package holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Plain binary package.
    #[default]
    Package,
    /// Application bundle.
    Application,
}

/// Metadata describing a stored package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEnvelope {
    /// Package identity.
    pub locator: Locator,
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// Hex encoded SHA-256 of the blob.
    pub sha256: String,
    /// Package or application.
    #[serde(default)]
    pub kind: PackageKind,
    /// Raw manifest bytes for application packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Vec<u8>>,
    /// Runtime labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_labels: Labels,
    /// Whether the package is hidden from listings.
    #[serde(default)]
    pub hidden: bool,
    /// Package this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Locator>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

impl PackageEnvelope {
    /// Whether the package only records that an application exists elsewhere.
    pub fn is_metadata(&self) -> bool {
        self.runtime_labels
            .get(PURPOSE_LABEL)
            .is_some_and(|purpose| purpose == PURPOSE_METADATA)
    }
}

/// Options accepted when writing a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOptions {
    /// Package or application.
    pub kind: PackageKind,
    /// Manifest bytes to store with the package.
    pub manifest: Option<Vec<u8>>,
    /// Runtime labels to set.
    pub labels: Labels,
    /// Hide the package from listings.
    pub hidden: bool,
}

impl PackageOptions {
    /// Options carrying over kind, manifest and hidden flag from an envelope,
    /// with the given labels.
    pub fn from_envelope(envelope: &PackageEnvelope, labels: Labels) -> Self {
        Self {
            kind: envelope.kind,
            manifest: envelope.manifest.clone(),
            labels,
            hidden: envelope.hidden,
        }
    }
}

/// An application package together with its parsed manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    /// Application identity.
    pub package: Locator,
    /// Stored package metadata.
    pub envelope: PackageEnvelope,
    /// Parsed manifest.
    pub manifest: Manifest,
}

/// Merge caller supplied labels over source labels. Caller values win.
pub fn merge_labels(source: &Labels, overrides: &Labels) -> Labels {
    let mut merged = source.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
