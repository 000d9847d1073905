// src/builder/mod.rs

//! Installer builder
//!
//! [`InstallFile`] assembles the self-extracting installer. Helpers here
//! render content-addressed Helm chart resources and find the container
//! images a Kubernetes manifest depends on.

pub mod helm;
mod install_file;
pub mod manifests;

pub use install_file::{BuiltInstaller, InstallFile, IMAGES_TARGET};
pub use manifests::images_in_manifest;
