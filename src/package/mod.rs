// src/package/mod.rs
//! Package data model
//!
//! This module defines what an installer carries and how it is applied:
//! - the package manifest (`.package.config`): identity, file inventory, permission rules
//! - the permission resolver that turns rules into ownership and modes
//! - the host-local configuration written at install time

pub mod local_config;
pub mod manifest;
pub mod permissions;

pub use local_config::{JoinConfig, LocalConfig, LOCAL_CONFIG_PATH};
pub use manifest::{PackageManifest, PermissionRule, MANIFEST_BACKUP_PATH, MANIFEST_PATH};
pub use permissions::{
    mode_for, PathPattern, PatternKind, PermissionApplier, PermissionPlan, PermissionPolicy,
    Resolution,
};
