// src/lib.rs

//! Stowage
//!
//! Self-extracting installers for container-based applications.
//!
//! # Architecture
//!
//! - Installer = native stub executable followed by a zip archive
//! - Every archive carries `.package.config`: identity, permission rules and
//!   a SHA-1 inventory of the files it ships
//! - Container image layers are stored gzip-compressed, through a
//!   path-keyed cache so repeated builds reuse earlier work
//! - Install verifies the inventory, enforces owner/group/mode from the
//!   most specific permission rule, and upgrades in place when a package
//!   is already present

pub mod builder;
mod error;
pub mod fetch;
pub mod filesystem;
pub mod hash;
pub mod images;
pub mod install;
pub mod lock;
pub mod package;
pub mod project;
pub mod settings;

pub use builder::{BuiltInstaller, InstallFile};
pub use error::{Error, Result};
pub use hash::{ContentHash, Hasher};
pub use install::{InstallOptions, InstallOutcome, InstallState, Installer, ParsedInstallFile};
pub use lock::WorkLock;
pub use package::{PackageManifest, PermissionRule};
pub use project::{BuildTools, Project};
pub use settings::BuildSettings;
