// src/install/package.rs

//! Reading an installer's embedded package

use crate::error::{Error, Result};
use crate::package::{PackageManifest, MANIFEST_PATH};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// An installer on disk together with its decoded manifest
#[derive(Debug, Clone)]
pub struct ParsedInstallFile {
    path: PathBuf,
    manifest: PackageManifest,
}

impl ParsedInstallFile {
    /// Open `path` as a zip archive and decode its `.package.config`
    pub fn parse(path: &Path) -> Result<Self> {
        let mut archive = open_archive(path)?;
        let entry = archive.by_name(MANIFEST_PATH).map_err(|_| {
            Error::ArchiveIntegrity(format!(
                "{} has no {} entry",
                path.display(),
                MANIFEST_PATH
            ))
        })?;
        let manifest = PackageManifest::from_reader(entry)?;

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Reopen the archive for extraction
    pub fn archive(&self) -> Result<ZipArchive<File>> {
        open_archive(&self.path)
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| {
        Error::ArchiveIntegrity(format!("cannot read install package {}: {}", path.display(), e))
    })
}
