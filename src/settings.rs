// src/settings.rs

//! Build-time settings
//!
//! Resolved from flags first, then `STOWAGE_*` environment variables, then
//! defaults under the user cache directory.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Name of the stub binary prepended to every installer
pub const INSTALLER_STUB_NAME: &str = "stowage-installer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Downloads, the layer cache and the work directory live here
    pub cache_dir: PathBuf,
    /// Scratch space for one build (saved image tarballs, rendered files)
    pub work_dir: PathBuf,
    pub compression_level: u32,
    pub installer_stub: PathBuf,
}

impl BuildSettings {
    pub fn new(cache_dir: &Path, compression_level: u32, installer_stub: &Path) -> Result<Self> {
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            work_dir: cache_dir.join("work"),
            compression_level: validate_compression_level(compression_level)?,
            installer_stub: installer_stub.to_path_buf(),
        })
    }

    /// Resolve settings from the process environment
    pub fn from_env(compression_level: Option<u32>, installer_stub: Option<PathBuf>) -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), compression_level, installer_stub)
    }

    /// Resolve settings using `lookup` for environment variables
    pub fn resolve<F>(
        lookup: F,
        compression_level: Option<u32>,
        installer_stub: Option<PathBuf>,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cache_dir = match lookup("STOWAGE_CACHE_DIR").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .ok_or_else(|| Error::Config("cannot determine a cache directory".to_string()))?
                .join("stowage"),
        };

        let work_dir = lookup("STOWAGE_WORK_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("work"));

        let installer_stub = match installer_stub {
            Some(stub) => stub,
            None => default_installer_stub()?,
        };

        Ok(Self {
            cache_dir,
            work_dir,
            compression_level: validate_compression_level(
                compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
            )?,
            installer_stub,
        })
    }
}

pub fn validate_compression_level(level: u32) -> Result<u32> {
    if level > MAX_COMPRESSION_LEVEL {
        return Err(Error::Config(format!(
            "compression level must be between 0 and {}, got {}",
            MAX_COMPRESSION_LEVEL, level
        )));
    }
    Ok(level)
}

/// `stowage-installer` next to the running executable
fn default_installer_stub() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.with_file_name(INSTALLER_STUB_NAME))
}
