// src/install/installer.rs

//! Fresh install and in-place upgrade
//!
//! The target decides the path: a directory that already holds
//! `.package.config` is upgraded, anything else gets a fresh install.
//!
//! ```text
//! Fresh ──────────────────────────────► Complete
//! Existing ──► Upgrading ─────────────► Complete
//!                 └─── any error ─────► Failed
//! ```
//!
//! An upgrade stops the running server, re-extracts over the existing files
//! and reuses the host settings recorded by the first install. A failed
//! upgrade is not rolled back.

use super::extract::{ExtractReport, Extractor, DEFAULT_CONTAINERD_SOCKET};
use super::join::JoinToken;
use super::package::ParsedInstallFile;
use super::process::{PidFileLocator, ProcessLocator};
use crate::error::Result;
use crate::filesystem::safe_join;
use crate::images::{CtrImporter, ImageImporter};
use crate::package::{LocalConfig, PackageManifest, PermissionApplier, LOCAL_CONFIG_PATH};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Admin kubeconfig written when the join token carries one
pub const KUBECONFIG_PATH: &str = "config/kubeconfig-admin.yaml";

const CTR_PROGRAM: &str = "ctr";

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// No package at the target
    Fresh,
    /// A package is already installed at the target
    Existing,
    Upgrading,
    Complete,
    Failed,
}

/// Host settings for a fresh install
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub target: PathBuf,
    pub admin_group: String,
    pub bind_address: String,
    pub join_token: Option<JoinToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        report: ExtractReport,
    },
    Upgraded {
        report: ExtractReport,
        /// A running server was stopped and has to be started again
        restart_required: bool,
        removed_files: usize,
    },
}

/// Drives an install or upgrade of one package
pub struct Installer<'a> {
    package: &'a ParsedInstallFile,
    locator: Box<dyn ProcessLocator>,
    importer: Option<Box<dyn ImageImporter>>,
    containerd_socket: PathBuf,
    stop_timeout: Duration,
    state: InstallState,
}

impl<'a> Installer<'a> {
    pub fn new(package: &'a ParsedInstallFile) -> Self {
        Self {
            package,
            locator: Box::new(PidFileLocator),
            importer: None,
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            state: InstallState::Fresh,
        }
    }

    pub fn with_locator(mut self, locator: Box<dyn ProcessLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_importer(mut self, importer: Box<dyn ImageImporter>, socket: &Path) -> Self {
        self.importer = Some(importer);
        self.containerd_socket = socket.to_path_buf();
        self
    }

    /// Import images with `ctr` over the default containerd socket
    pub fn with_ctr_importer(self) -> Self {
        let socket = PathBuf::from(DEFAULT_CONTAINERD_SOCKET);
        let importer = CtrImporter::new(Path::new(CTR_PROGRAM), &socket);
        self.with_importer(Box::new(importer), &socket)
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Classify `target` without touching it
    ///
    /// A manifest without the host config is left over from a fresh install
    /// that failed part way, so the target still counts as fresh.
    pub fn detect(target: &Path) -> InstallState {
        if PackageManifest::exists_in(target) && target.join(LOCAL_CONFIG_PATH).is_file() {
            InstallState::Existing
        } else {
            InstallState::Fresh
        }
    }

    /// Install into `options.target`, or upgrade it when a package is present
    pub fn run(&mut self, options: &InstallOptions) -> Result<InstallOutcome> {
        self.state = Self::detect(&options.target);

        let result = match self.state {
            InstallState::Existing => self.upgrade(&options.target),
            _ => self.install(options),
        };

        self.state = if result.is_ok() {
            InstallState::Complete
        } else {
            InstallState::Failed
        };
        result
    }

    fn extractor(&mut self, target: &Path, admin_group: &str) -> Extractor {
        let extractor = Extractor::new(target, admin_group);
        match self.importer.take() {
            Some(importer) => extractor
                .with_importer(importer)
                .with_containerd_socket(&self.containerd_socket),
            None => extractor,
        }
    }

    fn install(&mut self, options: &InstallOptions) -> Result<InstallOutcome> {
        let package = self.package;
        let manifest = package.manifest();
        info!(
            "Installing {} {} to {}",
            manifest.name,
            manifest.version,
            options.target.display()
        );

        let report = self
            .extractor(&options.target, &options.admin_group)
            .extract(package)?;

        let local_config = LocalConfig {
            admin_group: options.admin_group.clone(),
            bind_address: options.bind_address.clone(),
            join: options.join_token.as_ref().map(JoinToken::join_config),
        };
        local_config.save(&options.target)?;

        let applier = PermissionApplier::new(
            &options.target,
            manifest.permission_policy()?,
            &options.admin_group,
        )?;
        applier.apply("config")?;
        applier.apply(LOCAL_CONFIG_PATH)?;

        if let Some(token) = &options.join_token {
            if !token.kube_config.is_empty() {
                fs::write(options.target.join(KUBECONFIG_PATH), &token.kube_config)?;
                applier.apply(KUBECONFIG_PATH)?;
            }
        }

        info!("Installation complete");
        Ok(InstallOutcome::Installed { report })
    }

    fn upgrade(&mut self, target: &Path) -> Result<InstallOutcome> {
        self.state = InstallState::Upgrading;
        let package = self.package;
        let manifest = package.manifest();
        info!(
            "Upgrading {} to {} {}",
            target.display(),
            manifest.name,
            manifest.version
        );

        let local_config = LocalConfig::load(target)?;
        let previous = PackageManifest::load(target)?;
        PackageManifest::backup(target)?;

        let restart_required = self.stop_server(target);

        let report = self
            .extractor(target, &local_config.admin_group)
            .extract(package)?;

        let removed_files = remove_obsolete(target, &manifest.files_removed_since(&previous));

        info!("Upgrade complete");
        if restart_required {
            info!("Server was shut down as part of the upgrade and must be restarted");
        }

        Ok(InstallOutcome::Upgraded {
            report,
            restart_required,
            removed_files,
        })
    }

    /// Stop a running server; failures here mean "nothing to stop"
    fn stop_server(&self, target: &Path) -> bool {
        let handle = match self.locator.locate(target) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                info!("No server PID recorded, nothing to stop");
                return false;
            }
            Err(e) => {
                warn!("Cannot locate running server: {}", e);
                return false;
            }
        };

        if !handle.is_alive() {
            info!("No running server on PID {}", handle.pid());
            return false;
        }

        info!("Found running server on PID {}, shutting it down", handle.pid());
        match handle.terminate(self.stop_timeout) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot stop server on PID {}: {}", handle.pid(), e);
                false
            }
        }
    }
}

/// Delete files the previous package shipped and the new one does not
fn remove_obsolete(target: &Path, paths: &[&str]) -> usize {
    let mut removed = 0;
    for path in paths {
        let Ok(full) = safe_join(target, path) else {
            warn!("Not removing unsafe path {}", path);
            continue;
        };
        match fs::remove_file(&full) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove obsolete file {}: {}", full.display(), e),
        }
    }
    removed
}
