// src/cli/mod.rs
//! CLI definitions for the stowage builder
//!
//! Command implementations live in the `commands` module.
//!
//! - `build` - Build an installer from a project directory
//! - `upgrade` - Upgrade an installation from an installer file
//! - `inspect` - Show the manifest of an installer

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(author = "Stowage Contributors")]
#[command(version)]
#[command(about = "Build self-extracting installers for container-based applications", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an installer from a project directory
    Build {
        /// Directory holding stowage.toml
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Output directory for the installer
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,

        /// Deflate level for archive entries and image layers (0-9)
        #[arg(short = 'l', long)]
        compression_level: Option<u32>,

        /// Installer stub executable placed in front of the archive
        #[arg(long, value_name = "PATH")]
        installer_stub: Option<PathBuf>,
    },

    /// Upgrade an existing installation in place
    Upgrade {
        /// Installer file to upgrade from
        #[arg(short, long)]
        file: PathBuf,

        /// Installation directory
        #[arg(short, long)]
        install_path: Option<PathBuf>,
    },

    /// Show identity and file inventory of an installer
    Inspect {
        /// Installer file
        #[arg(short, long)]
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
