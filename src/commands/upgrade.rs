// src/commands/upgrade.rs

//! Upgrade command - re-extract an installer over an existing installation

use super::progress::Spinner;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use stowage::install::{require_root, InstallOptions, InstallOutcome, InstallState};
use stowage::{Installer, ParsedInstallFile, WorkLock};

pub fn cmd_upgrade(file: &Path, install_path: Option<PathBuf>) -> Result<()> {
    require_root("upgrade")?;

    let target = match install_path {
        Some(path) => path,
        None => env::current_dir().context("Failed to determine the current directory")?,
    };
    if Installer::detect(&target) != InstallState::Existing {
        bail!("No installation found at {}", target.display());
    }

    let package = ParsedInstallFile::parse(file)
        .with_context(|| format!("Failed to read installer {}", file.display()))?;
    let _lock = WorkLock::for_target(&target)?;

    let manifest = package.manifest();
    println!("Upgrading {} to {} {}", target.display(), manifest.name, manifest.version);

    // Host settings are reloaded from config/local.config during an upgrade
    let options = InstallOptions {
        target: target.clone(),
        admin_group: String::new(),
        bind_address: String::new(),
        join_token: None,
    };

    let spinner = Spinner::start("Upgrading");
    let mut installer = Installer::new(&package).with_ctr_importer();
    let outcome = match installer.run(&options) {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.fail();
            return Err(e).with_context(|| format!("Upgrade of {} failed", target.display()));
        }
    };
    spinner.finish("Done");

    if let InstallOutcome::Upgraded {
        report,
        restart_required,
        removed_files,
    } = outcome
    {
        println!(
            "Upgraded: {} files extracted, {} obsolete files removed, {} image sets imported",
            report.files, removed_files, report.images_imported
        );
        if restart_required {
            println!("The server was stopped for the upgrade and must be restarted");
        }
    }
    Ok(())
}
