// src/images/cache.rs

//! Persistent cache of recompressed image layers
//!
//! Entries are keyed by the layer's target path inside the installer. The
//! container engine names each layer directory after a content-derived id,
//! so the path already identifies the layer content and no separate hash is
//! computed.

use crate::error::Result;
use crate::filesystem::safe_join;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

/// How often the cache had to compress vs. could reuse an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub compressions: u64,
    pub hits: u64,
}

/// Gzip layer cache rooted at `<cache>/files`
pub struct DiskLayerCache {
    root: PathBuf,
    level: u32,
    stats: CacheStats,
}

impl DiskLayerCache {
    pub fn new(cache_dir: &Path, compression_level: u32) -> Self {
        Self {
            root: cache_dir.join("files"),
            level: compression_level,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file for the layer stored at `target`
    pub fn entry_path(&self, target: &str) -> Result<PathBuf> {
        safe_join(&self.root, &format!("{}.gz", target))
    }

    /// Gzip-compressed copy of `layer`, opened for reading at offset 0
    ///
    /// An entry is only reused after confirming it exists on disk. The layer
    /// is always compressed into a scratch file first; failing to store that
    /// in the cache only costs the reuse, never the build.
    pub fn compressed<R: Read>(&mut self, target: &str, layer: &mut R) -> Result<File> {
        let path = self.entry_path(target)?;

        if path.is_file() {
            debug!("Using cached layer {}", path.display());
            self.stats.hits += 1;
            return Ok(File::open(&path)?);
        }

        self.stats.compressions += 1;

        let mut encoder = GzEncoder::new(NamedTempFile::new()?, Compression::new(self.level));
        io::copy(layer, &mut encoder)?;
        let scratch = encoder.finish()?;

        match publish(scratch.path(), &path) {
            Ok(()) => debug!("Cached compressed layer at {}", path.display()),
            Err(e) => warn!("Cannot write layer cache {}: {}", path.display(), e),
        }

        let mut file = scratch.into_file();
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

/// Copy `scratch` into the cache under a unique temp name, then rename it
/// over `path`
fn publish(scratch: &Path, path: &Path) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

    let copied = fs::copy(scratch, &temp_path)
        .and_then(|_| File::open(&temp_path)?.sync_all())
        .and_then(|_| fs::rename(&temp_path, path));
    if copied.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    copied
}
