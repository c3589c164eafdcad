// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container image registry interface.
//!
//! Application bundles carry the contents of a Docker registry under
//! `registry/`. An [`ImageRegistry`] receives that tree after a bundle is
//! unpacked. [`DirectoryRegistry`] stores it in a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;
use crate::progress::ProgressReporter;

/// Outcome of a registry sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files written to the registry.
    pub files_copied: usize,
    /// Files the registry already held with identical contents.
    pub files_skipped: usize,
    /// Bytes written.
    pub bytes_copied: u64,
}

/// Destination for unpacked registry contents.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Replicate the registry tree rooted at `path`.
    async fn sync(&self, path: &Path, progress: Option<&ProgressReporter>) -> Result<SyncReport>;
}

/// Registry contents kept in a local directory.
///
/// Files are compared by SHA-256; identical files are not rewritten.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    /// Create a registry rooted at `root`. The directory is created on first sync.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The registry root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

async fn digest(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(Sha256::digest(&data).to_vec())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ImageRegistry for DirectoryRegistry {
    async fn sync(&self, path: &Path, progress: Option<&ProgressReporter>) -> Result<SyncReport> {
        let files = list_files(path).await?;
        let total = files.len().max(1);
        let mut report = SyncReport::default();

        for (i, file) in files.iter().enumerate() {
            let relative = file.strip_prefix(path).unwrap_or(file);
            let target = self.root.join(relative);
            let data = tokio::fs::read(file).await?;

            if digest(&target).await?.as_deref() == Some(Sha256::digest(&data).as_slice()) {
                debug!(file = %relative.display(), "Registry file up to date");
                report.files_skipped += 1;
            } else {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, &data).await?;
                report.files_copied += 1;
                report.bytes_copied += data.len() as u64;
            }

            if let Some(progress) = progress {
                let completion = ((i + 1) * 100 / total) as u8;
                progress.report(completion, format!("Synced {}", relative.display()));
            }
        }

        info!(
            registry = %self.root.display(),
            copied = report.files_copied,
            skipped = report.files_skipped,
            bytes = report.bytes_copied,
            "Registry synced"
        );
        Ok(report)
    }
}
