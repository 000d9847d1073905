// src/commands/build.rs

//! Build command - assemble an installer from a project directory

use super::progress::Spinner;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use stowage::fetch::{DockerCli, HelmCli};
use stowage::{BuildSettings, BuildTools, Project, WorkLock};
use tracing::info;

pub fn cmd_build(
    project_dir: &Path,
    out_dir: &Path,
    compression_level: Option<u32>,
    installer_stub: Option<PathBuf>,
) -> Result<()> {
    let project = Project::load(project_dir)
        .with_context(|| format!("Failed to load project in {}", project_dir.display()))?;
    let settings = BuildSettings::from_env(compression_level, installer_stub)
        .context("Invalid build settings")?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let output = out_dir.join(project.output_name());
    let _lock = WorkLock::for_output(&output)?;

    info!(
        "Building {} {} (compression level {}, cache {})",
        project.package.name,
        project.package.version,
        settings.compression_level,
        settings.cache_dir.display()
    );

    let engine = DockerCli::new();
    let tools = BuildTools {
        engine: &engine,
        charts: &HelmCli,
    };

    let spinner = Spinner::start(&format!("Building {}", project.output_name()));
    let built = match project.build(&settings, out_dir, &tools) {
        Ok(built) => built,
        Err(e) => {
            spinner.fail();
            return Err(e).with_context(|| format!("Failed to build {}", output.display()));
        }
    };
    spinner.finish("Done");

    let stats = built.cache_stats;
    println!("Built {}", built.path.display());
    println!("  Package: {} {} ({})", built.manifest.name, built.manifest.version, built.manifest.id);
    println!("  Files: {}", built.manifest.files.len());
    println!(
        "  Image layers: {} compressed, {} from cache",
        stats.compressions, stats.hits
    );
    Ok(())
}
