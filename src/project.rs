// src/project.rs

//! Build project file (`stowage.toml`)
//!
//! A project declares the package identity and everything that goes into
//! the installer. Relative paths are resolved against the project directory.
//!
//! ```toml
//! [package]
//! id = "demo"
//! name = "Demo"
//! version = "1.0"
//! manager = "demo-ctl"
//!
//! images = ["example/web:1"]
//!
//! [[files]]
//! source = "build/demo-ctl"
//! target = "bin/demo-ctl"
//!
//! [[charts]]
//! id = "redis"
//! repo = "https://charts.example.com"
//! chart = "redis"
//! version = "17.0.0"
//! values = "values/redis.yaml"
//!
//! [permissions."data/uploads/**"]
//! adminGroupReadable = true
//! adminGroupWritable = true
//! ```

use crate::builder::{images_in_manifest, BuiltInstaller, InstallFile};
use crate::error::{Error, Result};
use crate::fetch::{ChartSource, ContainerEngine, Downloader};
use crate::package::{PackageManifest, PermissionRule};
use crate::settings::BuildSettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const PROJECT_FILE: &str = "stowage.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageSection {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Control-plane binary name under `bin/`
    #[serde(default)]
    pub manager: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    pub source: PathBuf,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
}

/// A Helm chart, either a local `.tgz` or `repo` + `chart` + `version`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChartEntry {
    pub id: String,
    pub path: Option<PathBuf>,
    pub repo: Option<String>,
    pub chart: Option<String>,
    pub version: Option<String>,
    /// YAML file embedded as the chart's `valuesContent`
    pub values: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadEntry {
    pub url: String,
    pub target: String,
    /// Take only this file out of a downloaded `.tar.gz`
    pub extract: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Project {
    pub package: PackageSection,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub directories: Vec<FileEntry>,
    #[serde(default)]
    pub manifests: Vec<ManifestEntry>,
    #[serde(default)]
    pub charts: Vec<ChartEntry>,
    #[serde(default)]
    pub downloads: Vec<DownloadEntry>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, PermissionRule>,

    #[serde(skip)]
    root: PathBuf,
}

/// External tools a build may call
pub struct BuildTools<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub charts: &'a dyn ChartSource,
}

impl Project {
    /// Load `stowage.toml` from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE);
        let content = fs::read_to_string(&path).map_err(|e| Error::MissingInput {
            path: path.clone(),
            source: e,
        })?;
        let mut project = Self::parse(&content)?;
        project.root = dir.to_path_buf();
        Ok(project)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let project: Project = toml::from_str(content)?;
        project.validate()?;
        Ok(project)
    }

    fn validate(&self) -> Result<()> {
        let package = &self.package;
        for (field, value) in [("id", &package.id), ("name", &package.name), ("version", &package.version)] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("[package] {} must not be empty", field)));
            }
        }

        for chart in &self.charts {
            let remote = chart.repo.is_some() && chart.chart.is_some() && chart.version.is_some();
            if chart.path.is_some() == remote {
                return Err(Error::Config(format!(
                    "chart {} needs either path or repo, chart and version",
                    chart.id
                )));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// `<id>_<version>.installer`
    pub fn output_name(&self) -> String {
        format!("{}_{}.installer", self.package.id, self.package.version)
    }

    /// The manifest every build of this project starts from
    pub fn manifest(&self) -> PackageManifest {
        let mut manifest =
            PackageManifest::new(&self.package.id, &self.package.name, &self.package.version)
                .with_default_permissions();
        manifest.manager_filename = self.package.manager.clone();
        for (pattern, rule) in &self.permissions {
            manifest.set_permission(pattern, *rule);
        }
        manifest
    }

    /// Build the installer into `out_dir`
    pub fn build(
        &self,
        settings: &BuildSettings,
        out_dir: &Path,
        tools: &BuildTools<'_>,
    ) -> Result<BuiltInstaller> {
        let manifest = self.manifest();
        manifest.permission_policy()?;

        let output = out_dir.join(self.output_name());
        let mut install_file = InstallFile::start_creation(settings, &output, manifest)?;

        for file in &self.files {
            install_file.add_file(&self.resolve(&file.source), &file.target)?;
        }

        for dir in &self.directories {
            install_file.add_directory(&self.resolve(&dir.source), &dir.target)?;
        }

        for manifest in &self.manifests {
            install_file.add_kubernetes_manifest(&self.resolve(&manifest.path))?;
        }

        if !self.downloads.is_empty() {
            let downloader = Downloader::new(&settings.cache_dir)?;
            for download in &self.downloads {
                match &download.extract {
                    Some(inner) => install_file.add_downloaded_nested_file(
                        &downloader,
                        &download.url,
                        inner,
                        &download.target,
                    )?,
                    None => install_file.add_downloaded_file(&downloader, &download.url, &download.target)?,
                }
            }
        }

        for chart in &self.charts {
            let chart_file = match (&chart.path, &chart.repo, &chart.chart, &chart.version) {
                (Some(path), _, _, _) => self.resolve(path),
                (None, Some(repo), Some(name), Some(version)) => tools.charts.download(
                    repo,
                    name,
                    version,
                    &settings.cache_dir.join("charts"),
                )?,
                _ => return Err(Error::Config(format!("chart {} has no source", chart.id))),
            };

            let values_path = chart.values.as_ref().map(|path| self.resolve(path));
            let values = match &values_path {
                Some(path) => Some(fs::read_to_string(path).map_err(|e| Error::MissingInput {
                    path: path.clone(),
                    source: e,
                })?),
                None => None,
            };
            install_file.add_helm_chart(&chart_file, &chart.id, values.as_deref())?;

            let rendered = tools.charts.render(&chart_file, values_path.as_deref())?;
            for image in images_in_manifest(&rendered)? {
                install_file.add_image(&image);
            }
        }

        for image in &self.images {
            install_file.add_image(image);
        }

        info!("Finishing {}", output.display());
        install_file.complete_creation(tools.engine)
    }
}
