// src/fetch/archive.rs

//! Pulling a single file out of a downloaded `.tar.gz`

use crate::error::{Error, Result};
use crate::filesystem::{normalize_entry_path, safe_join};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Extract `inner` from the gzip-compressed tar at `archive`
///
/// The file lands in `<archive>.extracted/<inner>` and is reused when already
/// present. Fails with a "not found" error when the tar has no such entry.
pub fn extract_single_file(archive: &Path, inner: &str) -> Result<PathBuf> {
    let wanted = normalize_entry_path(inner)?;

    let mut out_dir = archive.as_os_str().to_owned();
    out_dir.push(".extracted");
    let target = safe_join(PathBuf::from(out_dir), &wanted)?;

    if target.is_file() {
        debug!("Using previously extracted {}", target.display());
        return Ok(target);
    }

    let file = File::open(archive).map_err(|source| Error::MissingInput {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut tar = Archive::new(GzDecoder::new(file));

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if normalize_entry_path(&name).ok().as_deref() != Some(wanted.as_str()) {
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mode = entry.header().mode().unwrap_or(0o644);

        let mut partial = tempfile::NamedTempFile::new_in(target.parent().unwrap_or(archive))?;
        io::copy(&mut entry, partial.as_file_mut())?;
        partial.persist(&target).map_err(|e| Error::Io(e.error))?;

        fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;

        debug!("Extracted {} from {}", wanted, archive.display());
        return Ok(target);
    }

    Err(Error::BuildInput(format!(
        "{} not found in {}",
        inner,
        archive.display()
    )))
}
