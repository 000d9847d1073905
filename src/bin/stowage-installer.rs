// src/bin/stowage-installer.rs

//! Installer stub
//!
//! This executable is copied in front of every installer archive. Run
//! directly, it installs the package appended to itself, or upgrades the
//! target when a package is already installed there.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use nix::unistd::Group;
use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use stowage::install::{require_root, InstallOptions, InstallOutcome, InstallState, JoinToken};
use stowage::{Installer, ParsedInstallFile, WorkLock};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Overrides the package path, which defaults to this executable
const PACKAGE_ENV: &str = "STOWAGE_INSTALL_PACKAGE";

const EXIT_NO_PERMISSION: u8 = 77;

#[derive(Parser)]
#[command(name = "stowage-installer")]
#[command(version)]
#[command(about = "Install or upgrade the package embedded in this file", long_about = None)]
struct Args {
    /// Installation directory
    #[arg(long)]
    install_path: Option<PathBuf>,

    /// Group granted access to the installation (must not be gid 0)
    #[arg(long)]
    admin_group: Option<String>,

    /// Address the server binds to
    #[arg(long)]
    bind_address: Option<String>,

    /// Token for joining an existing cluster, or `none`
    #[arg(long)]
    join_token: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

/// Reads answers for options not given on the command line
struct Prompter {
    interactive: bool,
}

impl Prompter {
    fn ask(&self, question: &str, flag: &str) -> Result<String> {
        if !self.interactive {
            bail!("--{} is required when not running interactively", flag);
        }
        print!("{}: ", question);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            bail!("No answer for --{}", flag);
        }
        Ok(line.trim().to_string())
    }

    fn ask_until<T>(
        &self,
        question: &str,
        flag: &str,
        check: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        loop {
            let answer = self.ask(question, flag)?;
            match check(&answer) {
                Ok(value) => return Ok(value),
                Err(e) => eprintln!("{}", e),
            }
        }
    }
}

fn check_admin_group(name: &str) -> Result<String> {
    if name.is_empty() {
        bail!("Admin group must not be empty");
    }
    let group = Group::from_name(name)
        .with_context(|| format!("Cannot look up group {}", name))?
        .ok_or_else(|| anyhow!("Group {} does not exist", name))?;
    if group.gid.as_raw() == 0 {
        bail!("Admin group must not be gid 0");
    }
    Ok(name.to_string())
}

fn check_bind_address(value: &str) -> Result<String> {
    value
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| anyhow!("{} is not an IP address", value))
}

fn check_join_token(value: &str) -> Result<Option<JoinToken>> {
    Ok(JoinToken::decode(value)?)
}

fn resolve<T>(
    given: Option<String>,
    prompter: &Prompter,
    question: &str,
    flag: &str,
    check: impl Fn(&str) -> Result<T>,
) -> Result<T> {
    match given {
        Some(value) => check(&value),
        None => prompter.ask_until(question, flag, check),
    }
}

fn package_path() -> Result<PathBuf> {
    match env::var_os(PACKAGE_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => env::current_exe().context("Cannot locate the installer executable"),
    }
}

fn run(args: Args) -> Result<()> {
    require_root("install")?;

    let prompter = Prompter {
        interactive: io::stdin().is_terminal(),
    };

    let package_path = package_path()?;
    let package = ParsedInstallFile::parse(&package_path)
        .with_context(|| format!("Failed to read package from {}", package_path.display()))?;
    let manifest = package.manifest();
    println!("{} {}", manifest.name, manifest.version);

    let target = resolve(
        args.install_path.map(|p| p.to_string_lossy().into_owned()),
        &prompter,
        "Installation directory",
        "install-path",
        |value| {
            if value.is_empty() {
                bail!("Installation directory must not be empty");
            }
            Ok(PathBuf::from(value))
        },
    )?;

    let options = if Installer::detect(&target) == InstallState::Existing {
        println!("Existing installation found at {}, upgrading", target.display());
        InstallOptions {
            target: target.clone(),
            admin_group: String::new(),
            bind_address: String::new(),
            join_token: None,
        }
    } else {
        let admin_group = resolve(
            args.admin_group,
            &prompter,
            "Admin group",
            "admin-group",
            check_admin_group,
        )?;
        let bind_address = resolve(
            args.bind_address,
            &prompter,
            "Bind address",
            "bind-address",
            check_bind_address,
        )?;
        let join_token = match args.join_token {
            Some(value) => check_join_token(&value)?,
            None if prompter.interactive => prompter.ask_until(
                "Join token (none to start a new cluster)",
                "join-token",
                check_join_token,
            )?,
            None => None,
        };

        InstallOptions {
            target: target.clone(),
            admin_group,
            bind_address,
            join_token,
        }
    };

    let _lock = WorkLock::for_target(&target)?;
    let mut installer = Installer::new(&package).with_ctr_importer();
    let outcome = installer
        .run(&options)
        .with_context(|| format!("Installation to {} failed", target.display()))?;

    match outcome {
        InstallOutcome::Installed { report } => {
            println!("Installed {} files to {}", report.files, target.display());
        }
        InstallOutcome::Upgraded {
            report,
            restart_required,
            removed_files,
        } => {
            println!(
                "Upgraded {} files, removed {} obsolete files",
                report.files, removed_files
            );
            if restart_required {
                println!("The server was stopped for the upgrade and must be restarted");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let permission_denied = e
                .chain()
                .filter_map(|cause| cause.downcast_ref::<stowage::Error>())
                .any(stowage::Error::is_permission);
            if permission_denied {
                ExitCode::from(EXIT_NO_PERMISSION)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
