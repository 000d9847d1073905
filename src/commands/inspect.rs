// src/commands/inspect.rs

//! Inspect command - show what an installer contains

use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use chrono::DateTime;
use std::path::Path;
use stowage::{PackageManifest, ParsedInstallFile};

pub fn cmd_inspect(file: &Path, format: OutputFormat) -> Result<()> {
    let package = ParsedInstallFile::parse(file)
        .with_context(|| format!("Failed to read installer {}", file.display()))?;
    let manifest = package.manifest();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(manifest)?);
        }
        OutputFormat::Text => print!("{}", render_text(manifest)),
    }
    Ok(())
}

fn render_text(manifest: &PackageManifest) -> String {
    let built = DateTime::from_timestamp(manifest.build_time, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| manifest.build_time.to_string());

    let mut out = String::new();
    out.push_str(&format!("Package: {} ({})\n", manifest.name, manifest.id));
    out.push_str(&format!("Version: {}\n", manifest.version));
    out.push_str(&format!("Built: {}\n", built));
    if !manifest.manager_filename.is_empty() {
        out.push_str(&format!("Manager: bin/{}\n", manifest.manager_filename));
    }

    out.push_str(&format!("Permission rules: {}\n", manifest.file_permissions.len()));
    out.push_str(&format!("Files: {}\n", manifest.files.len()));
    for (path, hash) in &manifest.files {
        out.push_str(&format!("  {}  {}\n", hash, path));
    }
    out
}
