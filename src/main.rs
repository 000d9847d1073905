// src/main.rs

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// `EX_NOPERM` from sysexits.h
const EXIT_NO_PERMISSION: u8 = 77;

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            project,
            out,
            compression_level,
            installer_stub,
        } => commands::cmd_build(&project, &out, compression_level, installer_stub),
        Commands::Upgrade { file, install_path } => commands::cmd_upgrade(&file, install_path),
        Commands::Inspect { file, format } => commands::cmd_inspect(&file, format),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
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
