// src/fetch/tools.rs

//! External build tools: the container engine and the Helm chart source
//!
//! Both are traits so builds can run against fakes in tests. The default
//! implementations shell out to the `docker` and `helm` CLIs. Charts are
//! rendered only to discover the images their workloads reference.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Pulls images and exports them as one `docker save` style tarball
pub trait ContainerEngine {
    fn pull(&self, tag: &str) -> Result<()>;

    /// Write all `tags` into a single image tarball at `dest`
    fn save(&self, tags: &[String], dest: &Path) -> Result<()>;
}

/// Fetches packaged Helm charts
pub trait ChartSource {
    /// Download `chart` at `version` from `repo` into `dest_dir`, returning the `.tgz`
    fn download(&self, repo: &str, chart: &str, version: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Render the chart's templates, optionally with a values file, to YAML
    fn render(&self, chart: &Path, values: Option<&Path>) -> Result<String>;
}

fn run(tool: &str, command: &mut Command) -> Result<()> {
    output(tool, command).map(drop)
}

/// Run `command` and return its stdout
fn output(tool: &str, command: &mut Command) -> Result<String> {
    debug!("Running {:?}", command);
    let output = command.output().map_err(|e| Error::Collaborator {
        tool: tool.to_string(),
        message: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(Error::Collaborator {
            tool: tool.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The `docker` command line client
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Use a different docker-compatible binary (e.g. `podman`)
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerEngine for DockerCli {
    fn pull(&self, tag: &str) -> Result<()> {
        info!("Pulling {}", tag);
        run(&self.program, Command::new(&self.program).args(["pull", "--quiet", tag]))
    }

    fn save(&self, tags: &[String], dest: &Path) -> Result<()> {
        info!("Saving {} image(s)", tags.len());
        run(
            &self.program,
            Command::new(&self.program)
                .arg("save")
                .arg("-o")
                .arg(dest)
                .args(tags),
        )
    }
}

/// The `helm` command line client
#[derive(Default)]
pub struct HelmCli;

impl ChartSource for HelmCli {
    fn download(&self, repo: &str, chart: &str, version: &str, dest_dir: &Path) -> Result<PathBuf> {
        let expected = dest_dir.join(format!("{}-{}.tgz", chart, version));
        if expected.is_file() {
            debug!("Using cached chart {}", expected.display());
            return Ok(expected);
        }

        fs::create_dir_all(dest_dir)?;
        info!("Downloading chart {} {} from {}", chart, version, repo);
        run(
            "helm",
            Command::new("helm")
                .args(["pull", chart, "--repo", repo, "--version", version, "--destination"])
                .arg(dest_dir),
        )?;

        if expected.is_file() {
            Ok(expected)
        } else {
            Err(Error::Collaborator {
                tool: "helm".to_string(),
                message: format!("expected {} after pull", expected.display()),
            })
        }
    }

    fn render(&self, chart: &Path, values: Option<&Path>) -> Result<String> {
        debug!("Rendering chart {}", chart.display());
        let mut command = Command::new("helm");
        command.arg("template").arg(chart);
        if let Some(values) = values {
            command.arg("--values").arg(values);
        }
        output("helm", &mut command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_program_is_collaborator_error() {
        let engine = DockerCli::with_program("stowage-no-such-docker");
        let err = engine.pull("alpine:3").unwrap_err();
        assert!(matches!(err, Error::Collaborator { .. }));
    }

    #[test]
    fn test_output_captures_stdout() {
        let text = output("sh", Command::new("sh").args(["-c", "echo rendered"])).unwrap();
        assert_eq!(text, "rendered\n");

        let err = output("sh", Command::new("sh").args(["-c", "echo broken >&2; exit 1"])).unwrap_err();
        assert_eq!(err.to_string(), "sh failed: broken");
    }

    #[test]
    fn test_cached_chart_is_reused() {
        let temp = TempDir::new().unwrap();
        let chart = temp.path().join("redis-1.2.3.tgz");
        fs::write(&chart, b"chart").unwrap();

        let found = HelmCli.download("https://charts.example.com", "redis", "1.2.3", temp.path());
        assert_eq!(found.unwrap(), chart);
    }
}
