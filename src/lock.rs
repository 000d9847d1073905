// src/lock.rs

//! Single-writer guard for build outputs and install targets
//!
//! A build holds `<output>.lock` while it writes an installer, and an install
//! or upgrade holds `<target>/.stowage.lock` while it rewrites the target.
//! The lock is `flock(LOCK_EX)` on the lock file and is released on drop.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock file kept inside an install target
pub const TARGET_LOCK_NAME: &str = ".stowage.lock";

/// Exclusive lock held for the duration of a build or install
pub struct WorkLock {
    file: File,
    path: PathBuf,
}

impl WorkLock {
    /// Lock guarding writes to the installer at `output`
    pub fn for_output(output: &Path) -> Result<Self> {
        let mut name = output.as_os_str().to_owned();
        name.push(".lock");
        Self::try_acquire(PathBuf::from(name))
    }

    /// Lock guarding an install target directory
    pub fn for_target(target: &Path) -> Result<Self> {
        Self::try_acquire(target.join(TARGET_LOCK_NAME))
    }

    /// Take the lock without blocking
    ///
    /// Fails with a configuration error naming the lock file when another
    /// process already holds it.
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::Config(format!(
                "{} is locked by another stowage process",
                path.display()
            ))),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
