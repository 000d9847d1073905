// src/package/manifest.rs
//! Package manifest (`.package.config`) data structures
//!
//! The manifest is serialized once into every installer as a YAML document.
//! It names the package, lists every packaged file with its content hash,
//! and carries the permission rules the installer enforces.

use crate::error::{Error, Result};
use crate::filesystem::normalize_entry_path;
use crate::hash::ContentHash;
use crate::package::permissions::PermissionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Archive path of the manifest entry
pub const MANIFEST_PATH: &str = ".package.config";

/// Where an upgrade keeps the manifest it replaced
pub const MANIFEST_BACKUP_PATH: &str = ".package.config.bak";

/// Access granted to the admin group for paths matching a pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionRule {
    pub admin_group_readable: bool,
    pub admin_group_writable: bool,
    pub executable: bool,
    /// Keep the mode stored in the archive untouched
    pub preserve_permissions: bool,
}

impl PermissionRule {
    /// Owner-only access
    pub const fn private() -> Self {
        Self {
            admin_group_readable: false,
            admin_group_writable: false,
            executable: false,
            preserve_permissions: false,
        }
    }

    pub const fn readable() -> Self {
        Self {
            admin_group_readable: true,
            ..Self::private()
        }
    }

    pub const fn writable() -> Self {
        Self {
            admin_group_readable: true,
            admin_group_writable: true,
            ..Self::private()
        }
    }

    pub const fn executable() -> Self {
        Self {
            admin_group_readable: true,
            executable: true,
            ..Self::private()
        }
    }

    pub const fn preserve() -> Self {
        Self {
            preserve_permissions: true,
            ..Self::private()
        }
    }
}

/// Root structure of `.package.config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub id: String,
    pub name: String,
    pub version: String,

    /// Unix seconds
    #[serde(default)]
    pub build_time: i64,

    /// File name of the control-plane binary under `bin/`
    #[serde(default)]
    pub manager_filename: String,

    #[serde(default)]
    pub file_permissions: BTreeMap<String, PermissionRule>,

    /// Archive-relative path -> content hash
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Create an empty manifest stamped with the current time
    pub fn new(id: &str, name: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            build_time: chrono::Utc::now().timestamp(),
            ..Self::default()
        }
    }

    /// Seed the permission table with the standard install tree layout
    pub fn with_default_permissions(mut self) -> Self {
        let defaults = [
            (".", PermissionRule::readable()),
            (MANIFEST_PATH, PermissionRule::readable()),
            ("config", PermissionRule::readable()),
            ("config/*", PermissionRule::readable()),
            ("logs", PermissionRule::readable()),
            ("logs/*", PermissionRule::readable()),
            ("bin", PermissionRule::readable()),
            ("bin/*", PermissionRule::executable()),
            ("lib", PermissionRule::readable()),
            ("lib/k3s", PermissionRule::executable()),
            ("lib/helm", PermissionRule::executable()),
            ("tmp", PermissionRule::writable()),
            ("tmp/*", PermissionRule::writable()),
            ("data/kubectl", PermissionRule::writable()),
            ("data/web", PermissionRule::readable()),
            ("data/**", PermissionRule::preserve()),
        ];

        for (pattern, rule) in defaults {
            self.file_permissions.insert(pattern.to_string(), rule);
        }
        self
    }

    /// Serialize to the YAML document stored in the archive
    pub fn encode(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse and validate a manifest document
    pub fn decode(content: &str) -> Result<Self> {
        let manifest: PackageManifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from a reader (e.g. a zip entry)
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::decode(&content)
    }

    /// Load the manifest of an existing installation
    pub fn load(install_root: &Path) -> Result<Self> {
        let content = fs::read_to_string(install_root.join(MANIFEST_PATH))?;
        Self::decode(&content)
    }

    /// True when `install_root` already holds an installation
    pub fn exists_in(install_root: &Path) -> bool {
        install_root.join(MANIFEST_PATH).is_file()
    }

    /// Copy the installed manifest aside before it is overwritten
    pub fn backup(install_root: &Path) -> Result<()> {
        fs::copy(
            install_root.join(MANIFEST_PATH),
            install_root.join(MANIFEST_BACKUP_PATH),
        )?;
        Ok(())
    }

    /// Check identity fields, path normalization, hashes and patterns
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Manifest("missing field: id".to_string()));
        }
        if self.version.is_empty() {
            return Err(Error::Manifest("missing field: version".to_string()));
        }

        for (path, hash) in &self.files {
            if normalize_entry_path(path)? != *path {
                return Err(Error::Manifest(format!("file path is not normalized: {}", path)));
            }
            ContentHash::new(hash.as_str())
                .map_err(|e| Error::Manifest(format!("bad hash for {}: {}", path, e)))?;
        }

        PermissionPolicy::from_rules(&self.file_permissions)?;
        Ok(())
    }

    /// Record a packaged file, returning the normalized path it was stored under
    pub fn register_file(&mut self, path: &str, hash: &ContentHash) -> Result<String> {
        let path = normalize_entry_path(path)?;
        self.files.insert(path.clone(), hash.to_string());
        Ok(path)
    }

    /// Add or replace a permission rule
    pub fn set_permission(&mut self, pattern: &str, rule: PermissionRule) {
        self.file_permissions.insert(pattern.to_string(), rule);
    }

    /// Compile the permission table
    pub fn permission_policy(&self) -> Result<PermissionPolicy> {
        PermissionPolicy::from_rules(&self.file_permissions)
    }

    /// Rule that applies to an archive-relative path
    ///
    /// Paths no rule matches get owner-only access.
    pub fn resolve_permission(&self, path: &str) -> Result<PermissionRule> {
        Ok(self.permission_policy()?.resolve(path).rule)
    }

    /// Packaged files present in `previous` but gone from this manifest
    pub fn files_removed_since<'a>(&self, previous: &'a PackageManifest) -> Vec<&'a str> {
        previous
            .files
            .keys()
            .filter(|path| !self.files.contains_key(*path))
            .map(String::as_str)
            .collect()
    }
}
