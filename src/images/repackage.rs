// src/images/repackage.rs

//! Image tarball repackaging
//!
//! A `docker save` tarball holds `manifest.json`, `repositories`, config
//! blobs and one `<id>/layer.tar` per layer. Repackaging streams it entry by
//! entry into a `<name>.untar/` tree: layer blobs become `layer.tar.gz`
//! (through the [`DiskLayerCache`]), everything else is copied unchanged.

use super::cache::DiskLayerCache;
use crate::error::{Error, Result};
use crate::filesystem::safe_join;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tar::{Archive, EntryType};
use tracing::{debug, info};

/// Destination for repackaged entries
pub trait LayerSink {
    fn add_entry<R: Read + Seek>(
        &mut self,
        path: &str,
        data: &mut R,
        modified: DateTime<Utc>,
    ) -> Result<()>;
}

/// Writes entries below a directory on disk
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl LayerSink for DirectorySink {
    fn add_entry<R: Read + Seek>(
        &mut self,
        path: &str,
        data: &mut R,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        let target = safe_join(&self.root, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(data, &mut file)?;
        file.set_modified(modified.into())?;
        Ok(())
    }
}

/// `data/agent/images/images.tar` -> `data/agent/images/images.untar`
pub fn untar_dir_for(target: &str) -> String {
    match target.strip_suffix(".tar") {
        Some(stem) => format!("{}.untar", stem),
        None => format!("{}.untar", target),
    }
}

fn is_layer(name: &str) -> bool {
    name.ends_with(".tar")
}

/// Repackage the image tarball at `source` into `target_dir` of `sink`
///
/// Returns the number of entries written.
pub fn repackage<S: LayerSink>(
    source: &Path,
    target_dir: &str,
    cache: &mut DiskLayerCache,
    sink: &mut S,
) -> Result<usize> {
    info!("Repackaging {} into {}", source.display(), target_dir);

    let file = File::open(source).map_err(|source_err| Error::MissingInput {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    let mut archive = Archive::new(file);
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let target = format!("{}/{}", target_dir, name.trim_start_matches("./"));
        let modified = UNIX_EPOCH + Duration::from_secs(entry.header().mtime().unwrap_or(0));
        let modified = DateTime::<Utc>::from(modified);

        if is_layer(&name) {
            let mut compressed = cache.compressed(&target, &mut entry)?;
            sink.add_entry(&format!("{}.gz", target), &mut compressed, modified)?;
        } else {
            let mut buffer = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buffer)?;
            sink.add_entry(&target, &mut Cursor::new(buffer), modified)?;
        }

        debug!("Repackaged {}", target);
        written += 1;
    }

    Ok(written)
}
