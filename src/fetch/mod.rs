// src/fetch/mod.rs

//! Producers of build inputs
//!
//! Downloads, nested archive extraction, container images and Helm charts.
//! The builder treats everything here as an opaque source of local files.

mod archive;
mod download;
mod tools;

pub use archive::extract_single_file;
pub use download::Downloader;
pub use tools::{ChartSource, ContainerEngine, DockerCli, HelmCli};
