// src/filesystem/path.rs

//! Path normalization for archive entries
//!
//! Entry names inside an installer are always relative, `/`-separated and
//! free of `.` and `..` components. The builder normalizes target paths
//! before hashing and registering them, and the extractor refuses any entry
//! that would land outside the install target.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an archive-relative path
///
/// Strips leading `/` and `./`, drops `.` components and rejects `..`.
///
/// # Examples
///
/// ```
/// use stowage::filesystem::normalize_entry_path;
///
/// assert_eq!(normalize_entry_path("/bin/app").unwrap(), "bin/app");
/// assert_eq!(normalize_entry_path("./data/./web/index.html").unwrap(), "data/web/index.html");
/// assert!(normalize_entry_path("../etc/passwd").is_err());
/// ```
pub fn normalize_entry_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();

    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(c) => {
                let part = c
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath(format!("Non UTF-8 path: {}", path)))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidPath(format!(
            "Empty path after normalization: '{}'",
            path
        )));
    }

    Ok(parts.join("/"))
}

/// Join an untrusted archive path onto a root directory
///
/// The result is always below `root`.
pub fn safe_join(root: impl AsRef<Path>, path: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    let normalized = normalize_entry_path(path)?;
    let joined = root.join(&normalized);

    if !joined.starts_with(root) {
        return Err(Error::PathTraversal(format!(
            "Path {} escapes root {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}
