// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application bundle codec.
//!
//! An application package is a gzip compressed tarball laid out as:
//!
//! ```text
//! resources/app.json      manifest
//! resources/...           other resources
//! registry/...            container registry contents (optional)
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::package::BlobReader;

/// Path of the manifest inside a bundle.
pub const MANIFEST_PATH: &str = "resources/app.json";

/// Directory holding container registry contents inside a bundle.
pub const REGISTRY_DIR: &str = "registry";

/// Builder for application bundles.
pub struct BundleBuilder {
    manifest: Vec<u8>,
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl BundleBuilder {
    /// Start a bundle for the given manifest.
    pub fn new(manifest: &Manifest) -> Result<Self> {
        Ok(Self {
            manifest: manifest.to_bytes()?,
            files: Vec::new(),
        })
    }

    /// Add a file under `registry/`.
    pub fn registry_file(mut self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Self {
        self.files
            .push((Path::new(REGISTRY_DIR).join(path), data.into()));
        self
    }

    /// Add a file under `resources/`.
    pub fn resource(mut self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Self {
        self.files
            .push((Path::new("resources").join(path), data.into()));
        self
    }

    /// Encode the bundle.
    pub fn build(self) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        append(&mut builder, Path::new(MANIFEST_PATH), &self.manifest)?;
        for (path, data) in &self.files {
            append(&mut builder, path, data)?;
        }

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &Path, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Extract the raw manifest from an encoded bundle.
pub fn read_manifest(bundle: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bundle));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let path = path.strip_prefix(".").unwrap_or(&path);
        if path == Path::new(MANIFEST_PATH) {
            let mut manifest = Vec::new();
            entry.read_to_end(&mut manifest)?;
            return Ok(manifest);
        }
    }
    Err(Error::BadParameter(format!(
        "bundle does not contain {}",
        MANIFEST_PATH
    )))
}

/// Unpack an encoded bundle into `dest`.
///
/// Entries that would land outside `dest` are skipped.
pub fn unpack(bundle: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(bundle));
    archive.unpack(dest)?;
    Ok(())
}

/// Read a bundle stream fully and unpack it into `dest` on the blocking pool.
pub async fn unpack_reader(mut reader: BlobReader, dest: &Path) -> Result<()> {
    let mut bundle = Vec::new();
    reader.read_to_end(&mut bundle).await?;
    debug!(bytes = bundle.len(), dest = %dest.display(), "Unpacking bundle");

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&bundle, &dest))
        .await
        .map_err(|e| Error::Other(format!("unpack task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new(&"example.com/app:1.0.0".parse().unwrap())
    }

    #[test]
    fn test_read_manifest_from_bundle() {
        let bundle = BundleBuilder::new(&manifest())
            .unwrap()
            .registry_file("docker/registry/v2/blobs/data", b"layer".to_vec())
            .build()
            .unwrap();

        let bytes = read_manifest(&bundle).unwrap();
        assert_eq!(Manifest::from_bytes(&bytes).unwrap(), manifest());
    }

    #[test]
    fn test_read_manifest_rejects_garbage() {
        assert!(read_manifest(b"not a tarball").is_err());

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let builder = tar::Builder::new(encoder);
        let empty = builder.into_inner().unwrap().finish().unwrap();
        assert!(read_manifest(&empty).unwrap_err().is_bad_parameter());
    }

    #[tokio::test]
    async fn test_unpack_reader_lays_out_files() {
        let bundle = BundleBuilder::new(&manifest())
            .unwrap()
            .resource("charts/app.yaml", b"chart".to_vec())
            .registry_file("index", b"idx".to_vec())
            .build()
            .unwrap();
        let dir = tempfile::tempdir().unwrap();

        unpack_reader(Box::new(std::io::Cursor::new(bundle)), dir.path())
            .await
            .unwrap();

        assert!(dir.path().join(MANIFEST_PATH).is_file());
        assert_eq!(
            std::fs::read(dir.path().join("resources/charts/app.yaml")).unwrap(),
            b"chart"
        );
        assert_eq!(
            std::fs::read(dir.path().join(REGISTRY_DIR).join("index")).unwrap(),
            b"idx"
        );
    }
}
