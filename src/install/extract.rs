// src/install/extract.rs

//! Materializing a package on disk
//!
//! Extraction resolves the admin group, unzips every entry below the target,
//! confirms that each file the manifest lists exists, and only then writes
//! the manifest itself. The permission policy is applied to those files and
//! to every directory the archive created. Content is not re-hashed here.

use super::package::ParsedInstallFile;
use crate::error::{Error, Result};
use crate::filesystem::safe_join;
use crate::images::{import_packaged_images, ImageImporter, IMAGES_DIR};
use crate::package::{PermissionApplier, MANIFEST_PATH};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use zip::read::ZipFile;

/// Control socket of the embedded container runtime
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/run/k3s/containerd/containerd.sock";

/// What an extraction did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub directories: usize,
    pub images_imported: usize,
}

/// Extracts packages into one target directory
pub struct Extractor {
    target: PathBuf,
    admin_group: String,
    containerd_socket: PathBuf,
    importer: Option<Box<dyn ImageImporter>>,
}

fn entry_time(time: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Some(naive.and_utc().into())
}

/// Write one archive entry to `dest` with its recorded mode and mtime
fn write_entry(entry: &mut ZipFile<'_>, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    // Replace rather than overwrite: a running binary cannot be opened for writing
    match fs::remove_file(dest) {
        Err(_) if dest.is_dir() => {
            return Err(Error::InvalidPath(format!(
                "cannot install file {}: a directory is in the way",
                dest.display()
            )));
        }
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    let mut file = File::create(dest)?;
    io::copy(entry, &mut file)?;

    let mode = entry.unix_mode().map(|m| m & 0o7777).unwrap_or(0o644);
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    if let Some(modified) = entry_time(entry.last_modified()) {
        file.set_modified(modified)?;
    }
    Ok(())
}

/// Every ancestor directory of `path`, e.g. `a/b/c` -> `a`, `a/b`
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

impl Extractor {
    pub fn new(target: &Path, admin_group: &str) -> Self {
        Self {
            target: target.to_path_buf(),
            admin_group: admin_group.to_string(),
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            importer: None,
        }
    }

    pub fn with_containerd_socket(mut self, socket: &Path) -> Self {
        self.containerd_socket = socket.to_path_buf();
        self
    }

    pub fn with_importer(mut self, importer: Box<dyn ImageImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn extract(&self, package: &ParsedInstallFile) -> Result<ExtractReport> {
        info!("Extracting {} to {}", package.path().display(), self.target.display());

        // Resolve the group before anything lands on disk
        let applier = PermissionApplier::new(
            &self.target,
            package.manifest().permission_policy()?,
            &self.admin_group,
        )?;

        fs::create_dir_all(&self.target)?;

        let mut report = ExtractReport::default();
        let mut directories = BTreeSet::new();
        let mut manifest_entry = None;

        let mut archive = package.archive()?;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().trim_end_matches('/').to_string();
            let dest = safe_join(&self.target, &name)?;

            directories.extend(ancestors(&name).map(str::to_string));
            if entry.is_dir() {
                fs::create_dir_all(&dest)?;
                directories.insert(name);
                continue;
            }

            // The manifest marks the target as installed, so it goes last
            if name == MANIFEST_PATH {
                manifest_entry = Some(index);
                continue;
            }

            write_entry(&mut entry, &dest)?;
            debug!("Extracted {}", name);
            report.files += 1;
        }

        self.verify(package)?;

        let index = manifest_entry.ok_or_else(|| {
            Error::ArchiveIntegrity(format!("expected file {} was not installed", MANIFEST_PATH))
        })?;
        write_entry(&mut archive.by_index(index)?, &self.target.join(MANIFEST_PATH))?;
        report.files += 1;

        for path in package.manifest().files.keys() {
            applier.apply(path)?;
        }
        applier.apply(MANIFEST_PATH)?;

        // Deepest first, the root last
        for dir in directories.iter().rev() {
            applier.apply(dir)?;
        }
        applier.apply(".")?;
        report.directories = directories.len();

        report.images_imported = self.import_images()?;
        Ok(report)
    }

    /// Every manifest-listed file must exist after extraction
    fn verify(&self, package: &ParsedInstallFile) -> Result<()> {
        for path in package.manifest().files.keys() {
            if !safe_join(&self.target, path)?.is_file() {
                return Err(Error::ArchiveIntegrity(format!(
                    "expected file {} was not installed",
                    path
                )));
            }
        }
        Ok(())
    }

    fn import_images(&self) -> Result<usize> {
        let importer = match &self.importer {
            Some(importer) if self.containerd_socket.exists() => importer,
            _ => {
                info!("Container runtime is not running. Not importing images");
                return Ok(0);
            }
        };

        info!("Importing images");
        import_packaged_images(&self.target.join(IMAGES_DIR), importer.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("a/b/c").collect::<Vec<_>>(), vec!["a", "a/b"]);
        assert!(ancestors("file").next().is_none());
    }

    #[test]
    fn test_entry_time() {
        let time = zip::DateTime::from_date_and_time(2024, 5, 17, 10, 30, 0).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
            .and_utc();
        assert_eq!(entry_time(time), Some(expected.into()));
    }
}
