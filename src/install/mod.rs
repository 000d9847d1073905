// src/install/mod.rs

//! Installer side: reading a package, extracting it and upgrading in place

mod extract;
mod installer;
mod join;
mod package;
pub mod process;

pub use extract::{ExtractReport, Extractor, DEFAULT_CONTAINERD_SOCKET};
pub use installer::{InstallOptions, InstallOutcome, InstallState, Installer, KUBECONFIG_PATH};
pub use join::JoinToken;
pub use package::ParsedInstallFile;
pub use process::{PidFileLocator, ProcessHandle, ProcessLocator, UnixProcess, SERVER_PID_PATH};

use crate::error::{Error, Result};

/// Fail with a permission error unless running as root
pub fn require_root(action: &str) -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(Error::NotPrivileged(format!("{} requires root", action)))
    }
}
