// src/error.rs

//! Error types shared by the builder, the installer and the upgrade path
//!
//! Variants are grouped by how callers react to them:
//! - build input errors abort a build and leave the output untrusted
//! - archive integrity and permission errors abort an install or upgrade
//! - process errors are logged by the upgrade path and treated as "nothing to stop"
//! - network errors carry the offending URL back to the caller

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot read build input {}: {source}", path.display())]
    MissingInput { path: PathBuf, source: io::Error },

    #[error("Expected {path} to be {expected} bytes but wrote {written}")]
    ShortWrite {
        path: String,
        expected: u64,
        written: u64,
    },

    #[error("Build input error: {0}")]
    BuildInput(String),

    #[error("Install package is incomplete: {0}")]
    ArchiveIntegrity(String),

    #[error("Unknown admin group: {0}")]
    UnknownGroup(String),

    #[error("Cannot set permissions on {}: {message}", path.display())]
    Permission { path: PathBuf, message: String },

    #[error("Must run as root: {0}")]
    NotPrivileged(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Failed to download {url}: {message}")]
    Network { url: String, message: String },

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Invalid permission pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse project file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{tool} failed: {message}")]
    Collaborator { tool: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors caused by missing privilege or an unusable admin group
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            Error::UnknownGroup(_) | Error::Permission { .. } | Error::NotPrivileged(_)
        )
    }

    /// True for errors that mean the package itself is broken
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::ArchiveIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_classification() {
        assert!(Error::UnknownGroup("admins".to_string()).is_permission());
        assert!(Error::NotPrivileged("install".to_string()).is_permission());
        assert!(!Error::Process("gone".to_string()).is_permission());
        assert!(Error::ArchiveIntegrity("bin/app".to_string()).is_integrity());
    }

    #[test]
    fn test_short_write_message() {
        let err = Error::ShortWrite {
            path: "bin/app".to_string(),
            expected: 10,
            written: 4,
        };
        assert_eq!(
            err.to_string(),
            "Expected bin/app to be 10 bytes but wrote 4"
        );
    }
}
