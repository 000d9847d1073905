// src/package/local_config.rs
//! Host-specific settings recorded at install time
//!
//! Written once by a fresh install and reloaded by every upgrade. Never
//! packaged into an installer.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Location of the local config relative to the install root
pub const LOCAL_CONFIG_PATH: &str = "config/local.config";

/// Cluster the host joined during install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub server: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    pub admin_group: String,
    #[serde(default)]
    pub bind_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinConfig>,
}

impl LocalConfig {
    pub fn load(install_root: &Path) -> Result<Self> {
        let path = install_root.join(LOCAL_CONFIG_PATH);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: LocalConfig = serde_yaml::from_str(&content)?;
        if config.admin_group.is_empty() {
            return Err(Error::Config(format!(
                "{} does not name an admin group",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Write the config, returning the path written
    ///
    /// Callers apply the package permission policy to the result.
    pub fn save(&self, install_root: &Path) -> Result<PathBuf> {
        let path = install_root.join(LOCAL_CONFIG_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }
}
